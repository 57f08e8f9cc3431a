//! Bidirectional UDP bridge between a local plaintext application and a
//! remote encrypted peer.
//!
//! One task owns the sockets, the counters, and the active
//! [`SessionContext`]; rekey handshakes run on spawned workers and publish
//! a fully built replacement context through a channel, which the loop
//! installs in a single assignment between iterations. Nothing blocking or
//! CPU-bound ever runs on the data path.

pub mod counters;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout_at;
use tracing::{debug, error, info, warn};

use crate::control::{ControlMsg, ControlPhase, ControlState};
use crate::core::constants::{
    MAX_DATAGRAM, MAX_EPOCH, PACKET_TYPE_CONTROL, PACKET_TYPE_DATA,
};
use crate::core::{Config, DropKind, HandshakeError, ProxyError, SendError};
use crate::crypto::kdf::{Role, TransportKeys};
use crate::crypto::provider::PqPrimitives;
use crate::handshake::{SessionSecrets, TokenBucket, client_handshake, server_handshake};
use crate::identity::SigningIdentity;
use crate::suites::{self, Suite};
use crate::wire::{CryptoIds, Receiver, Sender};

pub use counters::{CountersSnapshot, ProxyCounters};

/// Commands from the interactive rekey console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Negotiate toward the given suite alias.
    Rekey(String),
    /// Log the current control-plane state.
    Status,
    /// Stop the proxy.
    Quit,
}

/// Role-specific key material for the handshake.
#[derive(Clone)]
pub enum RoleIdentity {
    /// GCS holds the persistent signing keypair.
    Gcs(SigningIdentity),
    /// Drone holds the GCS signature public key.
    Drone {
        /// GCS signature public key bytes.
        gcs_sig_public: Vec<u8>,
    },
}

/// The active crypto state of one session. Exactly one is live per proxy;
/// it is replaced whole at rekey commit, never mutated piecemeal.
struct SessionContext {
    suite: &'static Suite,
    session_id: [u8; 8],
    sender: Sender,
    receiver: Receiver,
}

impl SessionContext {
    fn build(
        role: Role,
        suite: &'static Suite,
        secrets: SessionSecrets,
        epoch: u8,
        config: &Config,
    ) -> Self {
        let ids = CryptoIds::from(suite.header_ids());
        let algorithm = suite.aead_algorithm();
        let session_id = secrets.session_id;
        let (send_key, recv_key) = TransportKeys {
            key_d2g: secrets.key_d2g,
            key_g2d: secrets.key_g2d,
        }
        .into_directions(role);
        Self {
            suite,
            session_id,
            sender: Sender::new(config.wire_version, ids, session_id, epoch, algorithm, send_key),
            receiver: Receiver::new(
                config.wire_version,
                ids,
                session_id,
                epoch,
                algorithm,
                recv_key,
                config.replay_window,
            ),
        }
    }
}

struct RekeyOutcome {
    rid: String,
    suite: &'static Suite,
    elapsed_ms: u64,
    result: Result<SessionSecrets, HandshakeError>,
}

/// Run one proxy until its stop condition, returning the final counters.
pub async fn run(
    role: Role,
    suite: &'static Suite,
    identity: RoleIdentity,
    config: Config,
    provider: Arc<dyn PqPrimitives>,
    stop_after: Option<Duration>,
    mut console: Option<mpsc::UnboundedReceiver<ConsoleCommand>>,
) -> Result<CountersSnapshot, ProxyError> {
    match (role, &identity) {
        (Role::Gcs, RoleIdentity::Gcs(_)) | (Role::Drone, RoleIdentity::Drone { .. }) => {}
        _ => return Err(ProxyError::Config("identity does not match role".into())),
    }
    if !suites::is_enabled(suite, provider.as_ref()) {
        return Err(ProxyError::Config(format!(
            "suite {} not enabled by the primitive provider",
            suite.suite_id
        )));
    }
    if config.psk_is_default() {
        warn!("DRONE_PSK is unset; using the all-zero development key");
    }

    let start = tokio::time::Instant::now();
    let overall = stop_after.unwrap_or(config.handshake_timeout);
    let secrets =
        perform_handshake(role, suite, &identity, &config, provider.as_ref(), overall).await?;
    info!(
        role = %role,
        suite_id = %suite.suite_id,
        session_id = %hex::encode(secrets.session_id),
        "handshake completed"
    );

    let mut context = SessionContext::build(role, suite, secrets, 0, &config);
    let sockets = setup_sockets(role, &config).await?;

    let mut counters = ProxyCounters::default();
    let filter_provider = Arc::clone(&provider);
    let mut control = ControlState::new(role, suite.suite_id.clone()).with_suite_filter(move |sid| {
        suites::get(sid)
            .map(|s| suites::is_enabled(s, filter_provider.as_ref()))
            .unwrap_or(false)
    });

    let identity = Arc::new(identity);
    let config = Arc::new(config);
    let (rekey_tx, mut rekey_rx) = mpsc::channel::<RekeyOutcome>(1);
    let mut inflight: Option<String> = None;
    let mut pinned_src: Option<SocketAddr> = None;

    let deadline = stop_after.map(|d| start + d);
    let stop = async move {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(stop);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut enc_buf = vec![0u8; MAX_DATAGRAM];
    let mut ptx_buf = vec![0u8; MAX_DATAGRAM];

    loop {
        // Control messages queue up while the loop is busy; flush them first.
        while let Some(msg) = control.outbox.pop_front() {
            send_control(&sockets, &mut context, &mut counters, &msg).await;
        }

        tokio::select! {
            res = sockets.plaintext_in.recv_from(&mut ptx_buf) => {
                let Ok((len, _)) = res else { continue };
                if len == 0 {
                    continue;
                }
                counters.ptx_in += 1;

                let mut payload = Vec::with_capacity(len + 1);
                if config.enable_packet_type {
                    payload.push(PACKET_TYPE_DATA);
                }
                payload.extend_from_slice(&ptx_buf[..len]);

                match context.sender.encrypt(&payload) {
                    Ok(wire) => {
                        match sockets.encrypted.send_to(&wire, sockets.encrypted_peer).await {
                            Ok(_) => counters.enc_out += 1,
                            Err(e) => {
                                debug!(error = %e, "encrypted send failed");
                                counters.record_drop(DropKind::Other);
                            }
                        }
                    }
                    Err(SendError::SeqExhausted) => {
                        counters.record_drop(DropKind::Other);
                        warn!("sequence space exhausted; refusing to encrypt");
                        // An exhausted sender can no longer carry control
                        // traffic either, so a negotiated prepare would never
                        // leave this proxy. Go straight to the off-path
                        // handshake on the current suite.
                        if role == Role::Gcs && control.phase() == ControlPhase::Running && inflight.is_none() {
                            let suite_id = context.suite.suite_id.clone();
                            match control.force_rekey(&suite_id) {
                                Ok(rid) => {
                                    launch_rekey(
                                        role,
                                        &suite_id,
                                        rid,
                                        context.sender.epoch(),
                                        &identity,
                                        &config,
                                        &provider,
                                        &rekey_tx,
                                        &mut control,
                                        &mut inflight,
                                    )?;
                                }
                                Err(e) => {
                                    debug!(error = %e, "could not force recovery rekey");
                                }
                            }
                        }
                    }
                    Err(SendError::EncryptFailed) => {
                        counters.record_drop(DropKind::Other);
                    }
                }
            }

            res = sockets.encrypted.recv_from(&mut enc_buf) => {
                let Ok((len, src)) = res else { continue };
                if len == 0 {
                    continue;
                }
                counters.enc_in += 1;

                if config.strict_udp_peer_match && pinned_src.is_some_and(|pin| pin != src) {
                    counters.record_drop(DropKind::SrcAddr);
                    continue;
                }

                let plaintext = match context.receiver.decrypt(&enc_buf[..len]) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        debug!(error = %e, wire_len = len, "decrypt failed");
                        counters.record_drop(e.drop_kind());
                        continue;
                    }
                };
                if pinned_src.is_none() {
                    pinned_src = Some(src);
                    debug!(peer = %src, "pinned encrypted peer address");
                }

                if config.enable_packet_type && !plaintext.is_empty() {
                    match plaintext[0] {
                        PACKET_TYPE_DATA => {
                            match sockets.plaintext_out.send_to(&plaintext[1..], sockets.plaintext_peer).await {
                                Ok(_) => counters.ptx_out += 1,
                                Err(_) => counters.record_drop(DropKind::Other),
                            }
                        }
                        PACKET_TYPE_CONTROL => {
                            let Ok(msg) = serde_json::from_slice::<ControlMsg>(&plaintext[1..]) else {
                                counters.record_drop(DropKind::Other);
                                continue;
                            };
                            let action = control.handle(msg);
                            if let Some((suite_id, rid)) = action.start_handshake {
                                launch_rekey(
                                    role,
                                    &suite_id,
                                    rid,
                                    context.sender.epoch(),
                                    &identity,
                                    &config,
                                    &provider,
                                    &rekey_tx,
                                    &mut control,
                                    &mut inflight,
                                )?;
                            }
                        }
                        _ => counters.record_drop(DropKind::Other),
                    }
                } else {
                    match sockets.plaintext_out.send_to(&plaintext, sockets.plaintext_peer).await {
                        Ok(_) => counters.ptx_out += 1,
                        Err(_) => counters.record_drop(DropKind::Other),
                    }
                }
            }

            Some(outcome) = rekey_rx.recv() => {
                inflight = None;
                match outcome.result {
                    Ok(secrets) => {
                        let epoch = context.sender.epoch().saturating_add(1);
                        let fresh = SessionContext::build(role, outcome.suite, secrets, epoch, &config);
                        info!(
                            suite_id = %outcome.suite.suite_id,
                            session_id = %hex::encode(fresh.session_id),
                            epoch,
                            rid = %outcome.rid,
                            "installing rekeyed session context"
                        );
                        context = fresh;
                        pinned_src = None;
                        control.record_rekey_result(&outcome.rid, &outcome.suite.suite_id, true, outcome.elapsed_ms);
                    }
                    Err(e) => {
                        warn!(
                            suite_id = %outcome.suite.suite_id,
                            rid = %outcome.rid,
                            error = %e,
                            "rekey handshake failed; keeping current context"
                        );
                        control.record_rekey_result(&outcome.rid, &outcome.suite.suite_id, false, outcome.elapsed_ms);
                    }
                }
            }

            cmd = recv_console(&mut console) => {
                match cmd {
                    Some(ConsoleCommand::Rekey(alias)) => {
                        match control.request_prepare(&alias) {
                            Ok(rid) => info!(rid, alias, "rekey requested"),
                            Err(e) => warn!(error = %e, alias, "rekey request refused"),
                        }
                    }
                    Some(ConsoleCommand::Status) => {
                        info!(
                            phase = control.phase().as_str(),
                            suite = control.current_suite(),
                            last_status = ?control.last_status(),
                            rekeys_ok = control.stats.rekeys_ok,
                            rekeys_fail = control.stats.rekeys_fail,
                            "control status"
                        );
                    }
                    Some(ConsoleCommand::Quit) => break,
                    None => console = None,
                }
            }

            _ = &mut stop => break,

            _ = &mut ctrl_c => {
                info!("interrupt received; stopping proxy");
                break;
            }
        }
    }

    if let Some(rid) = inflight.take() {
        // worker abandoned at shutdown; its context is never published
        warn!(rid, "rekey worker abandoned at shutdown");
        control.stats.rekeys_fail += 1;
    }

    let snapshot = counters.snapshot(&control.stats);
    info!(role = %role, ?snapshot, "proxy stopped");
    Ok(snapshot)
}

async fn recv_console(
    rx: &mut Option<mpsc::UnboundedReceiver<ConsoleCommand>>,
) -> Option<ConsoleCommand> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_control(
    sockets: &ProxySockets,
    context: &mut SessionContext,
    counters: &mut ProxyCounters,
    msg: &ControlMsg,
) {
    let body = match serde_json::to_vec(msg) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to encode control message");
            counters.record_drop(DropKind::Other);
            return;
        }
    };
    let mut frame = Vec::with_capacity(1 + body.len());
    frame.push(PACKET_TYPE_CONTROL);
    frame.extend_from_slice(&body);

    match context.sender.encrypt(&frame) {
        Ok(wire) => match sockets.encrypted.send_to(&wire, sockets.encrypted_peer).await {
            Ok(_) => counters.enc_out += 1,
            Err(e) => {
                warn!(error = %e, "failed to send control message");
                counters.record_drop(DropKind::Other);
            }
        },
        Err(e) => {
            warn!(error = %e, "failed to encrypt control message");
            counters.record_drop(DropKind::Other);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn launch_rekey(
    role: Role,
    suite_id: &str,
    rid: String,
    current_epoch: u8,
    identity: &Arc<RoleIdentity>,
    config: &Arc<Config>,
    provider: &Arc<dyn PqPrimitives>,
    rekey_tx: &mpsc::Sender<RekeyOutcome>,
    control: &mut ControlState,
    inflight: &mut Option<String>,
) -> Result<(), ProxyError> {
    if current_epoch == MAX_EPOCH {
        error!(epoch = current_epoch, "rekey would wrap the epoch; terminating session");
        return Err(ProxyError::EpochWrapForbidden);
    }
    if let Some(active) = inflight.as_deref() {
        debug!(rid, active, "rekey already in flight; ignoring duplicate");
        return Ok(());
    }
    let suite = match suites::get(suite_id) {
        Ok(suite) => suite,
        Err(e) => {
            warn!(suite_id, rid, error = %e, "rekey rejected: unknown suite");
            control.record_rekey_result(&rid, suite_id, false, 0);
            return Ok(());
        }
    };

    info!(role = %role, suite_id, rid, "rekey negotiation started");
    *inflight = Some(rid.clone());

    let identity = Arc::clone(identity);
    let config = Arc::clone(config);
    let provider = Arc::clone(provider);
    let tx = rekey_tx.clone();
    tokio::spawn(async move {
        let started = std::time::Instant::now();
        let result = perform_handshake(
            role,
            suite,
            &identity,
            &config,
            provider.as_ref(),
            config.rekey_handshake_timeout,
        )
        .await;
        let outcome = RekeyOutcome {
            rid,
            suite,
            elapsed_ms: started.elapsed().as_millis() as u64,
            result,
        };
        let _ = tx.send(outcome).await;
    });
    Ok(())
}

/// Drive one handshake for `role`, bounded by `overall`.
async fn perform_handshake(
    role: Role,
    suite: &'static Suite,
    identity: &RoleIdentity,
    config: &Config,
    provider: &dyn PqPrimitives,
    overall: Duration,
) -> Result<SessionSecrets, HandshakeError> {
    let deadline = tokio::time::Instant::now() + overall;
    match (role, identity) {
        (Role::Gcs, RoleIdentity::Gcs(signing)) => {
            gcs_handshake(suite, signing, config, provider, deadline).await
        }
        (Role::Drone, RoleIdentity::Drone { gcs_sig_public }) => {
            drone_handshake(suite, gcs_sig_public, config, provider, deadline).await
        }
        _ => Err(HandshakeError::Format("identity does not match role")),
    }
}

/// GCS accept loop: rate-limit, handshake, return the first success.
async fn gcs_handshake(
    suite: &'static Suite,
    signing: &SigningIdentity,
    config: &Config,
    provider: &dyn PqPrimitives,
    deadline: tokio::time::Instant,
) -> Result<SessionSecrets, HandshakeError> {
    let listener = bind_handshake_listener(config.tcp_handshake_port)?;
    let mut gate = TokenBucket::new(config.handshake_rl_burst, config.handshake_rl_refill_per_sec);

    loop {
        let (mut stream, peer) = match timeout_at(deadline, listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(HandshakeError::Timeout),
        };
        if !gate.allow(peer.ip()) {
            // one byte, no crypto
            warn!(peer = %peer, "handshake rate limit exceeded");
            let _ = stream.write_all(&[0u8]).await;
            continue;
        }
        match timeout_at(
            deadline,
            server_handshake(
                &mut stream,
                peer,
                suite,
                signing,
                &config.drone_psk,
                config.wire_version,
                provider,
            ),
        )
        .await
        {
            Ok(Ok(secrets)) => return Ok(secrets),
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "handshake attempt failed");
                continue;
            }
            Err(_) => return Err(HandshakeError::Timeout),
        }
    }
}

async fn drone_handshake(
    suite: &'static Suite,
    gcs_sig_public: &[u8],
    config: &Config,
    provider: &dyn PqPrimitives,
    deadline: tokio::time::Instant,
) -> Result<SessionSecrets, HandshakeError> {
    let addr = SocketAddr::new(config.gcs_host, config.tcp_handshake_port);
    let mut stream = match timeout_at(deadline, connect_with_retry(addr)).await {
        Ok(stream) => stream?,
        Err(_) => return Err(HandshakeError::Timeout),
    };
    match timeout_at(
        deadline,
        client_handshake(
            &mut stream,
            suite,
            gcs_sig_public,
            &config.drone_psk,
            config.wire_version,
            provider,
        ),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}

async fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
    let mut attempt = 0u32;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                attempt += 1;
                if attempt >= 5 {
                    return Err(e);
                }
                debug!(%addr, attempt, error = %e, "handshake connect failed; retrying");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

fn bind_handshake_listener(port: u16) -> io::Result<tokio::net::TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    socket.listen(32)
}

struct ProxySockets {
    encrypted: UdpSocket,
    plaintext_in: UdpSocket,
    plaintext_out: UdpSocket,
    encrypted_peer: SocketAddr,
    plaintext_peer: SocketAddr,
}

async fn setup_sockets(role: Role, config: &Config) -> io::Result<ProxySockets> {
    let (enc_rx, ptx_tx, ptx_rx, encrypted_peer) = match role {
        Role::Drone => (
            config.udp_drone_rx,
            config.drone_plaintext_tx,
            config.drone_plaintext_rx,
            SocketAddr::new(config.gcs_host, config.udp_gcs_rx),
        ),
        Role::Gcs => (
            config.udp_gcs_rx,
            config.gcs_plaintext_tx,
            config.gcs_plaintext_rx,
            SocketAddr::new(config.drone_host, config.udp_drone_rx),
        ),
    };

    let encrypted = UdpSocket::from_std(bind_encrypted(enc_rx, config.encrypted_dscp)?)?;
    let plaintext_in = UdpSocket::bind((Ipv4Addr::LOCALHOST, ptx_tx)).await?;
    let plaintext_out = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;

    Ok(ProxySockets {
        encrypted,
        plaintext_in,
        plaintext_out,
        encrypted_peer,
        plaintext_peer: SocketAddr::from((Ipv4Addr::LOCALHOST, ptx_rx)),
    })
}

/// Bind the encrypted socket, applying the DSCP marking when configured.
fn bind_encrypted(port: u16, dscp: Option<u8>) -> io::Result<std::net::UdpSocket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    if let Some(dscp) = dscp {
        // DSCP occupies the high 6 bits of the TOS byte
        if let Err(e) = socket.set_tos(u32::from(dscp) << 2) {
            warn!(dscp, error = %e, "could not set DSCP on encrypted socket");
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::PSK_LEN;
    use crate::crypto::provider::PqcleanProvider;
    use tokio::time::timeout;
    use zeroize::Zeroizing;

    fn test_config(base_port: u16) -> Config {
        let mut psk = Zeroizing::new([0u8; PSK_LEN]);
        for (i, b) in psk.iter_mut().enumerate() {
            *b = i as u8;
        }
        Config {
            tcp_handshake_port: base_port,
            udp_gcs_rx: base_port + 1,
            udp_drone_rx: base_port + 2,
            gcs_plaintext_tx: base_port + 3,
            gcs_plaintext_rx: base_port + 4,
            drone_plaintext_tx: base_port + 5,
            drone_plaintext_rx: base_port + 6,
            drone_psk: psk,
            ..Config::default()
        }
    }

    fn spawn_pair(
        suite: &'static Suite,
        config: &Config,
        stop_after: Duration,
        console: Option<mpsc::UnboundedReceiver<ConsoleCommand>>,
    ) -> (
        tokio::task::JoinHandle<Result<CountersSnapshot, ProxyError>>,
        tokio::task::JoinHandle<Result<CountersSnapshot, ProxyError>>,
    ) {
        let provider: Arc<dyn PqPrimitives> = Arc::new(PqcleanProvider);
        let signing = SigningIdentity::generate(suite, provider.as_ref()).unwrap();
        let gcs_sig_public = signing.public().to_vec();

        let gcs = tokio::spawn(run(
            Role::Gcs,
            suite,
            RoleIdentity::Gcs(signing),
            config.clone(),
            Arc::clone(&provider),
            Some(stop_after),
            console,
        ));
        let drone_config = config.clone();
        let drone = tokio::spawn(async move {
            // give the GCS a moment to bind its handshake listener
            tokio::time::sleep(Duration::from_millis(200)).await;
            run(
                Role::Drone,
                suite,
                RoleIdentity::Drone { gcs_sig_public },
                drone_config,
                provider,
                Some(stop_after - Duration::from_millis(200)),
                None,
            )
            .await
        });
        (gcs, drone)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_proxy_pair_round_trip() {
        let suite = suites::get("cs-mlkem768-aesgcm-mldsa65").unwrap();
        let config = test_config(47610);
        let (gcs, drone) = spawn_pair(suite, &config, Duration::from_secs(5), None);

        // local app endpoints: sender feeds the drone, receiver sits at the GCS
        let app_rx = UdpSocket::bind((Ipv4Addr::LOCALHOST, config.gcs_plaintext_rx))
            .await
            .unwrap();
        let app_tx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        // wait for both handshakes to settle
        tokio::time::sleep(Duration::from_secs(1)).await;

        let drone_ingress = SocketAddr::from((Ipv4Addr::LOCALHOST, config.drone_plaintext_tx));
        for _ in 0..10 {
            app_tx.send_to(b"ping", drone_ingress).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let mut buf = [0u8; 64];
        let mut received = 0;
        while received < 10 {
            match timeout(Duration::from_secs(1), app_rx.recv_from(&mut buf)).await {
                Ok(Ok((len, _))) => {
                    assert_eq!(&buf[..len], b"ping");
                    received += 1;
                }
                _ => break,
            }
        }
        assert_eq!(received, 10);

        let gcs_counters = gcs.await.unwrap().unwrap();
        let drone_counters = drone.await.unwrap().unwrap();
        assert_eq!(drone_counters.ptx_in, 10);
        assert_eq!(drone_counters.enc_out, 10);
        assert_eq!(gcs_counters.enc_in, 10);
        assert_eq!(gcs_counters.ptx_out, 10);
        assert_eq!(drone_counters.drops, 0);
        assert_eq!(gcs_counters.drops, 0);
    }

    #[tokio::test]
    async fn test_rekey_at_max_epoch_is_fatal() {
        let provider: Arc<dyn PqPrimitives> = Arc::new(PqcleanProvider);
        let suite = suites::get("cs-mlkem512-aesgcm-mldsa44").unwrap();
        let signing = SigningIdentity::generate(suite, provider.as_ref()).unwrap();
        let identity = Arc::new(RoleIdentity::Gcs(signing));
        let config = Arc::new(test_config(47650));
        let (tx, _rx) = mpsc::channel(1);
        let mut control = ControlState::new(Role::Gcs, suite.suite_id.clone());
        let mut inflight = None;

        let err = launch_rekey(
            Role::Gcs,
            &suite.suite_id,
            "r1".into(),
            MAX_EPOCH,
            &identity,
            &config,
            &provider,
            &tx,
            &mut control,
            &mut inflight,
        )
        .unwrap_err();
        assert!(matches!(err, ProxyError::EpochWrapForbidden));
        assert!(inflight.is_none());

        // one step below the ceiling the rekey may still launch
        launch_rekey(
            Role::Gcs,
            &suite.suite_id,
            "r2".into(),
            MAX_EPOCH - 1,
            &identity,
            &config,
            &provider,
            &tx,
            &mut control,
            &mut inflight,
        )
        .unwrap();
        assert!(inflight.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_band_rekey_swaps_suite() {
        let suite = suites::get("cs-mlkem768-aesgcm-mldsa65").unwrap();
        let target = "cs-mlkem1024-chacha20poly1305-mldsa87";
        let config = test_config(47630);
        let (console_tx, console_rx) = mpsc::unbounded_channel();
        let (gcs, drone) = spawn_pair(suite, &config, Duration::from_secs(7), Some(console_rx));

        let app_rx = UdpSocket::bind((Ipv4Addr::LOCALHOST, config.gcs_plaintext_rx))
            .await
            .unwrap();
        let app_tx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // continuous plaintext flow before, during, and after the rekey
        let drone_ingress = SocketAddr::from((Ipv4Addr::LOCALHOST, config.drone_plaintext_tx));
        let sender = tokio::spawn(async move {
            for i in 0..150u32 {
                let _ = app_tx.send_to(b"tick", drone_ingress).await;
                if i == 30 {
                    // operator requests the new suite mid-flow
                    let _ = console_tx.send(ConsoleCommand::Rekey(target.to_string()));
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let mut buf = [0u8; 64];
        let mut received = 0u32;
        loop {
            match timeout(Duration::from_secs(2), app_rx.recv_from(&mut buf)).await {
                Ok(Ok(_)) => received += 1,
                _ => break,
            }
        }
        sender.await.unwrap();

        let gcs_counters = gcs.await.unwrap().unwrap();
        let drone_counters = drone.await.unwrap().unwrap();

        assert_eq!(gcs_counters.rekeys_ok, 1, "gcs: {gcs_counters:?}");
        assert_eq!(drone_counters.rekeys_ok, 1, "drone: {drone_counters:?}");
        assert_eq!(gcs_counters.last_rekey_suite, target);
        assert_eq!(drone_counters.last_rekey_suite, target);
        // the swap may cost a brief window of in-flight packets, nothing more
        assert!(received >= 120, "only {received} of 150 ticks delivered");
    }
}
