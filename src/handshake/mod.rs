//! Authenticated PQC key-exchange handshake over TCP.
//!
//! The GCS (server) sends a signed `ServerHello` carrying an ephemeral KEM
//! public key; the drone (client) verifies the transcript signature against
//! the GCS identity it was provisioned with, encapsulates, and proves
//! possession of the pre-shared key by HMACing the exact hello bytes. Both
//! sides then expand the shared secret into the two directional transport
//! keys.
//!
//! The wire version byte sits inside the signed transcript, so a
//! man-in-the-middle flipping it invalidates the signature rather than
//! steering negotiation.

pub mod ratelimit;

use std::net::SocketAddr;

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::core::HandshakeError;
use crate::core::constants::{
    CHALLENGE_LEN, MAX_HELLO_LEN, MAX_KEM_CT_LEN, PSK_LEN, SESSION_ID_LEN, TRANSCRIPT_DOMAIN,
};
use crate::crypto::kdf::derive_transport_keys;
use crate::crypto::provider::PqPrimitives;
use crate::crypto::SessionKey;
use crate::identity::SigningIdentity;
use crate::suites::Suite;

pub use ratelimit::TokenBucket;

type HmacSha256 = Hmac<Sha256>;

/// Size of the drone's PSK authentication tag.
pub const AUTH_TAG_LEN: usize = 32;

/// Keys and identifiers produced by a completed handshake.
#[derive(Debug)]
pub struct SessionSecrets {
    /// Drone-to-GCS transport key.
    pub key_d2g: SessionKey,
    /// GCS-to-drone transport key.
    pub key_g2d: SessionKey,
    /// Session ID minted by the GCS.
    pub session_id: [u8; SESSION_ID_LEN],
    /// Negotiated KEM mechanism name.
    pub kem_name: String,
    /// Negotiated signature mechanism name.
    pub sig_name: String,
}

/// Parsed `ServerHello` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// Wire version byte (signed).
    pub version: u8,
    /// KEM mechanism name.
    pub kem_name: String,
    /// Signature mechanism name.
    pub sig_name: String,
    /// Session ID for the new session.
    pub session_id: [u8; SESSION_ID_LEN],
    /// Random anti-reuse challenge.
    pub challenge: [u8; CHALLENGE_LEN],
    /// Ephemeral KEM public key.
    pub kem_pub: Vec<u8>,
    /// Detached signature over the transcript.
    pub signature: Vec<u8>,
}

impl ServerHello {
    /// Serialize to the length-prefixed field layout (without the outer
    /// frame length).
    pub fn encode(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(
            1 + 2 + self.kem_name.len()
                + 2 + self.sig_name.len()
                + SESSION_ID_LEN
                + CHALLENGE_LEN
                + 4 + self.kem_pub.len()
                + 2 + self.signature.len(),
        );
        wire.push(self.version);
        wire.extend_from_slice(&(self.kem_name.len() as u16).to_be_bytes());
        wire.extend_from_slice(self.kem_name.as_bytes());
        wire.extend_from_slice(&(self.sig_name.len() as u16).to_be_bytes());
        wire.extend_from_slice(self.sig_name.as_bytes());
        wire.extend_from_slice(&self.session_id);
        wire.extend_from_slice(&self.challenge);
        wire.extend_from_slice(&(self.kem_pub.len() as u32).to_be_bytes());
        wire.extend_from_slice(&self.kem_pub);
        wire.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        wire.extend_from_slice(&self.signature);
        wire
    }

    /// Parse a hello frame.
    pub fn decode(wire: &[u8]) -> Result<Self, HandshakeError> {
        let mut r = Reader::new(wire);
        let version = r.u8()?;
        let kem_len = r.u16()? as usize;
        let kem_name = str_field(r.take(kem_len)?, "kem name")?;
        let sig_len = r.u16()? as usize;
        let sig_name = str_field(r.take(sig_len)?, "sig name")?;
        let mut session_id = [0u8; SESSION_ID_LEN];
        session_id.copy_from_slice(r.take(SESSION_ID_LEN)?);
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(r.take(CHALLENGE_LEN)?);
        let kem_pub_len = r.u32()? as usize;
        if kem_pub_len > MAX_HELLO_LEN {
            return Err(HandshakeError::Format("kem public key oversized"));
        }
        let kem_pub = r.take(kem_pub_len)?.to_vec();
        let sig_bytes_len = r.u16()? as usize;
        let signature = r.take(sig_bytes_len)?.to_vec();
        if !r.is_empty() {
            return Err(HandshakeError::Format("trailing bytes in hello"));
        }
        if kem_name.is_empty() || sig_name.is_empty() {
            return Err(HandshakeError::Format("empty mechanism name"));
        }
        Ok(Self {
            version,
            kem_name,
            sig_name,
            session_id,
            challenge,
            kem_pub,
            signature,
        })
    }
}

/// Bytes covered by the hello signature.
pub fn transcript(
    version: u8,
    session_id: &[u8; SESSION_ID_LEN],
    kem_name: &str,
    sig_name: &str,
    kem_pub: &[u8],
    challenge: &[u8; CHALLENGE_LEN],
) -> Vec<u8> {
    let mut t = Vec::with_capacity(
        1 + TRANSCRIPT_DOMAIN.len()
            + SESSION_ID_LEN
            + kem_name.len()
            + sig_name.len()
            + kem_pub.len()
            + CHALLENGE_LEN
            + 4,
    );
    t.push(version);
    t.extend_from_slice(TRANSCRIPT_DOMAIN);
    t.extend_from_slice(session_id);
    t.push(b'|');
    t.extend_from_slice(kem_name.as_bytes());
    t.push(b'|');
    t.extend_from_slice(sig_name.as_bytes());
    t.push(b'|');
    t.extend_from_slice(kem_pub);
    t.push(b'|');
    t.extend_from_slice(challenge);
    t
}

fn psk_tag(psk: &[u8; PSK_LEN], hello_wire: &[u8]) -> [u8; AUTH_TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(psk).expect("HMAC accepts any key length");
    mac.update(hello_wire);
    mac.finalize().into_bytes().into()
}

/// GCS side: drive one handshake over an accepted connection.
///
/// Sends the signed hello, waits for the KEM ciphertext and PSK tag,
/// verifies the tag in constant time before any KEM work, then derives the
/// transport keys. The ephemeral KEM state is consumed by decapsulation.
pub async fn server_handshake<S>(
    stream: &mut S,
    peer: SocketAddr,
    suite: &Suite,
    signing: &SigningIdentity,
    psk: &[u8; PSK_LEN],
    wire_version: u8,
    provider: &dyn PqPrimitives,
) -> Result<SessionSecrets, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session_id = [0u8; SESSION_ID_LEN];
    let mut challenge = [0u8; CHALLENGE_LEN];
    OsRng.fill_bytes(&mut session_id);
    OsRng.fill_bytes(&mut challenge);

    let keypair = provider.kem_keygen(suite.kem_name)?;
    let transcript_bytes = transcript(
        wire_version,
        &session_id,
        suite.kem_name,
        suite.sig_name,
        &keypair.public,
        &challenge,
    );
    let signature = provider.sig_sign(suite.sig_name, signing.secret(), &transcript_bytes)?;

    let hello = ServerHello {
        version: wire_version,
        kem_name: suite.kem_name.to_string(),
        sig_name: suite.sig_name.to_string(),
        session_id,
        challenge,
        kem_pub: keypair.public,
        signature,
    };
    let hello_wire = hello.encode();
    write_frame(stream, &hello_wire).await?;

    let mut ct_len_bytes = [0u8; 4];
    stream.read_exact(&mut ct_len_bytes).await?;
    let ct_len = u32::from_be_bytes(ct_len_bytes) as usize;
    if ct_len == 0 || ct_len > MAX_KEM_CT_LEN {
        return Err(HandshakeError::Format("kem ciphertext length out of range"));
    }
    let mut kem_ct = vec![0u8; ct_len];
    stream.read_exact(&mut kem_ct).await?;
    let mut tag = [0u8; AUTH_TAG_LEN];
    stream.read_exact(&mut tag).await?;

    let mut mac = HmacSha256::new_from_slice(psk.as_slice()).expect("HMAC accepts any key length");
    mac.update(&hello_wire);
    if mac.verify_slice(&tag).is_err() {
        warn!(peer = %peer, "rejected drone handshake with bad authentication tag");
        return Err(HandshakeError::Auth);
    }

    let shared_secret = keypair.decapsulator.decapsulate(&kem_ct)?;
    let keys = derive_transport_keys(&session_id, suite.kem_name, suite.sig_name, &shared_secret)?;

    debug!(peer = %peer, session_id = %hex::encode(session_id), "handshake complete");
    Ok(SessionSecrets {
        key_d2g: keys.key_d2g,
        key_g2d: keys.key_g2d,
        session_id,
        kem_name: suite.kem_name.to_string(),
        sig_name: suite.sig_name.to_string(),
    })
}

/// Drone side: drive one handshake over a connected stream.
///
/// Signature verification is mandatory and covers the version byte; a
/// tampered hello fails [`HandshakeError::Verify`], and a validly signed
/// hello for the wrong version or algorithms fails
/// [`HandshakeError::Downgrade`]. No retry on verification failure.
pub async fn client_handshake<S>(
    stream: &mut S,
    suite: &Suite,
    gcs_sig_public: &[u8],
    psk: &[u8; PSK_LEN],
    wire_version: u8,
    provider: &dyn PqPrimitives,
) -> Result<SessionSecrets, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello_wire = read_frame(stream, MAX_HELLO_LEN).await?;
    let hello = ServerHello::decode(&hello_wire)?;

    let transcript_bytes = transcript(
        hello.version,
        &hello.session_id,
        &hello.kem_name,
        &hello.sig_name,
        &hello.kem_pub,
        &hello.challenge,
    );
    let verified = provider.sig_verify(
        &hello.sig_name,
        gcs_sig_public,
        &transcript_bytes,
        &hello.signature,
    )?;
    if !verified {
        return Err(HandshakeError::Verify);
    }

    if hello.version != wire_version {
        return Err(HandshakeError::Downgrade {
            expected: format!("version {wire_version}"),
            negotiated: format!("version {}", hello.version),
        });
    }
    if hello.kem_name != suite.kem_name {
        return Err(HandshakeError::Downgrade {
            expected: suite.kem_name.to_string(),
            negotiated: hello.kem_name,
        });
    }
    if hello.sig_name != suite.sig_name {
        return Err(HandshakeError::Downgrade {
            expected: suite.sig_name.to_string(),
            negotiated: hello.sig_name,
        });
    }

    let encap = provider.kem_encapsulate(&hello.kem_name, &hello.kem_pub)?;
    let tag = psk_tag(psk, &hello_wire);

    let mut reply = Vec::with_capacity(4 + encap.ciphertext.len() + AUTH_TAG_LEN);
    reply.extend_from_slice(&(encap.ciphertext.len() as u32).to_be_bytes());
    reply.extend_from_slice(&encap.ciphertext);
    reply.extend_from_slice(&tag);
    stream.write_all(&reply).await?;
    stream.flush().await?;

    let keys = derive_transport_keys(
        &hello.session_id,
        &hello.kem_name,
        &hello.sig_name,
        &encap.shared_secret,
    )?;

    debug!(session_id = %hex::encode(hello.session_id), "handshake complete");
    Ok(SessionSecrets {
        key_d2g: keys.key_d2g,
        key_g2d: keys.key_g2d,
        session_id: hello.session_id,
        kem_name: hello.kem_name,
        sig_name: hello.sig_name,
    })
}

async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<S>(stream: &mut S, max_len: usize) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len == 0 || len > max_len {
        return Err(HandshakeError::Format("frame length out of range"));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

fn str_field(bytes: &[u8], what: &'static str) -> Result<String, HandshakeError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| HandshakeError::Format(what))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], HandshakeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(HandshakeError::Format("truncated hello"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, HandshakeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, HandshakeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, HandshakeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::PqcleanProvider;
    use crate::suites;
    use std::net::{Ipv4Addr, SocketAddr};

    fn test_psk() -> [u8; PSK_LEN] {
        let mut psk = [0u8; PSK_LEN];
        for (i, b) in psk.iter_mut().enumerate() {
            *b = i as u8;
        }
        psk
    }

    fn peer() -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 9999)
    }

    #[test]
    fn test_hello_encode_decode_roundtrip() {
        let hello = ServerHello {
            version: 1,
            kem_name: "ML-KEM-768".into(),
            sig_name: "ML-DSA-65".into(),
            session_id: [1; SESSION_ID_LEN],
            challenge: [2; CHALLENGE_LEN],
            kem_pub: vec![3; 1184],
            signature: vec![4; 3309],
        };
        let wire = hello.encode();
        assert_eq!(ServerHello::decode(&wire).unwrap(), hello);
    }

    #[test]
    fn test_hello_decode_rejects_truncation_and_trailing() {
        let hello = ServerHello {
            version: 1,
            kem_name: "ML-KEM-768".into(),
            sig_name: "ML-DSA-65".into(),
            session_id: [1; SESSION_ID_LEN],
            challenge: [2; CHALLENGE_LEN],
            kem_pub: vec![3; 32],
            signature: vec![4; 64],
        };
        let wire = hello.encode();

        for cut in [0, 1, 5, wire.len() - 1] {
            assert!(matches!(
                ServerHello::decode(&wire[..cut]),
                Err(HandshakeError::Format(_))
            ));
        }

        let mut extended = wire.clone();
        extended.push(0);
        assert!(matches!(
            ServerHello::decode(&extended),
            Err(HandshakeError::Format(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_roundtrip_keys_match() {
        let provider = PqcleanProvider;
        let suite = suites::get("cs-mlkem768-aesgcm-mldsa65").unwrap();
        let signing = SigningIdentity::generate(suite, &provider).unwrap();
        let gcs_pub = signing.public().to_vec();
        let psk = test_psk();

        let (mut client_side, mut server_side) = tokio::io::duplex(256 * 1024);
        let server = tokio::spawn(async move {
            server_handshake(&mut server_side, peer(), suite, &signing, &psk, 1, &PqcleanProvider).await
        });
        let client =
            client_handshake(&mut client_side, suite, &gcs_pub, &psk, 1, &provider).await.unwrap();
        let server = server.await.unwrap().unwrap();

        assert_eq!(client.session_id, server.session_id);
        assert_eq!(client.key_d2g.as_bytes(), server.key_d2g.as_bytes());
        assert_eq!(client.key_g2d.as_bytes(), server.key_g2d.as_bytes());

        // drone send key == gcs recv key, and vice versa
        let (d_send, d_recv) = (client.key_d2g, client.key_g2d);
        let (g_send, g_recv) = (server.key_g2d, server.key_d2g);
        assert_eq!(d_send.as_bytes(), g_recv.as_bytes());
        assert_eq!(d_recv.as_bytes(), g_send.as_bytes());
    }

    #[tokio::test]
    async fn test_flipped_version_byte_fails_verification() {
        let provider = PqcleanProvider;
        let suite = suites::get("cs-mlkem768-aesgcm-mldsa65").unwrap();
        let signing = SigningIdentity::generate(suite, &provider).unwrap();
        let gcs_pub = signing.public().to_vec();
        let psk = test_psk();

        // build a legitimate hello, then flip the version byte in transit
        let keypair = provider.kem_keygen(suite.kem_name).unwrap();
        let session_id = [7u8; SESSION_ID_LEN];
        let challenge = [9u8; CHALLENGE_LEN];
        let t = transcript(1, &session_id, suite.kem_name, suite.sig_name, &keypair.public, &challenge);
        let signature = provider.sig_sign(suite.sig_name, signing.secret(), &t).unwrap();
        let mut hello = ServerHello {
            version: 1,
            kem_name: suite.kem_name.into(),
            sig_name: suite.sig_name.into(),
            session_id,
            challenge,
            kem_pub: keypair.public,
            signature,
        };
        hello.version = 2; // man in the middle

        let (mut client_side, mut mitm_side) = tokio::io::duplex(256 * 1024);
        let wire = hello.encode();
        tokio::spawn(async move {
            let _ = write_frame(&mut mitm_side, &wire).await;
        });

        let err = client_handshake(&mut client_side, suite, &gcs_pub, &psk, 1, &provider)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Verify));
    }

    #[tokio::test]
    async fn test_bad_psk_rejected_by_server() {
        let provider = PqcleanProvider;
        let suite = suites::get("cs-mlkem512-aesgcm-mldsa44").unwrap();
        let signing = SigningIdentity::generate(suite, &provider).unwrap();
        let gcs_pub = signing.public().to_vec();
        let good_psk = test_psk();
        let mut bad_psk = good_psk;
        bad_psk[PSK_LEN - 1] ^= 0x01;

        let (mut client_side, mut server_side) = tokio::io::duplex(256 * 1024);
        let server = tokio::spawn(async move {
            server_handshake(&mut server_side, peer(), suite, &signing, &good_psk, 1, &PqcleanProvider)
                .await
        });
        // client completes its sending half before the server rejects
        let _ = client_handshake(&mut client_side, suite, &gcs_pub, &bad_psk, 1, &provider).await;
        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, HandshakeError::Auth));
    }

    #[tokio::test]
    async fn test_wrong_suite_is_downgrade() {
        let provider = PqcleanProvider;
        let offered = suites::get("cs-mlkem512-aesgcm-mldsa44").unwrap();
        let expected = suites::get("cs-mlkem768-aesgcm-mldsa65").unwrap();
        let signing = SigningIdentity::generate(offered, &provider).unwrap();
        let gcs_pub = signing.public().to_vec();
        let psk = test_psk();

        let (mut client_side, mut server_side) = tokio::io::duplex(256 * 1024);
        tokio::spawn(async move {
            let _ = server_handshake(
                &mut server_side,
                peer(),
                offered,
                &signing,
                &psk,
                1,
                &PqcleanProvider,
            )
            .await;
        });
        let err = client_handshake(&mut client_side, expected, &gcs_pub, &psk, 1, &provider)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Downgrade { .. }));
    }
}
