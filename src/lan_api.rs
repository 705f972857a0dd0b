use crate::error::HubError;
use crate::settings::{SettingKind, SettingsLookup};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::OnceCell;

/// The hub listens for both discovery and commands on this port
pub const HUB_PORT: u16 = 2012;

pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

const DISCOVERY_HEX: &str =
    "010003ffffffffffffca000000010400044795000401040004000400040000000000000000020000003000";

static DISCOVERY_MESSAGE: Lazy<Vec<u8>> = Lazy::new(|| {
    data_encoding::HEXLOWER
        .decode(DISCOVERY_HEX.as_bytes())
        .expect("discovery message to be valid hex")
});

/// Finds the hub on the local network by broadcasting the
/// discovery datagram and taking the first responder.
#[derive(Clone)]
pub struct HubLocator {
    target: SocketAddr,
    settings: Arc<dyn SettingsLookup>,
}

impl HubLocator {
    pub fn new(settings: Arc<dyn SettingsLookup>) -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::BROADCAST, HUB_PORT)),
            settings,
        }
    }

    /// Send the discovery datagram somewhere other than the
    /// broadcast address
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub async fn discover(&self, timeout: Duration) -> Result<IpAddr, HubError> {
        match self.attempt(timeout).await {
            Ok(Some(addr)) => {
                log::info!("hub discovered at {addr}");
                return Ok(addr);
            }
            Ok(None) => {
                log::warn!("no hub answered discovery within {timeout:?}");
            }
            Err(err) => {
                log::error!("hub discovery failed: {err:#}");
            }
        }

        match self.settings.find(SettingKind::BackupAddress, "").await {
            Some(setting) => {
                let addr: IpAddr = setting.value.parse().map_err(|err| {
                    HubError::Configuration(format!(
                        "backup address '{}' is invalid: {err:#}",
                        setting.value
                    ))
                })?;
                log::warn!("using backup hub address {addr}");
                Ok(addr)
            }
            None => Err(HubError::DiscoveryTimeout(timeout)),
        }
    }

    /// One socket per attempt; it is dropped, and so closed, on every
    /// path out of this function.
    async fn attempt(&self, timeout: Duration) -> Result<Option<IpAddr>, HubError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        socket.send_to(&DISCOVERY_MESSAGE, self.target).await?;

        let mut buf = [0u8; 1024];
        match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, addr))) => {
                log::trace!("discovery reply of {len} bytes from {addr}");
                Ok(Some(addr.ip()))
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Ok(None),
        }
    }
}

/// Transmits `packet` to `addr` and waits for any datagram in reply,
/// which the hub sends as an acknowledgement.
pub async fn send_packet(
    packet: &[u8],
    addr: SocketAddr,
    timeout: Duration,
) -> Result<(), HubError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.send_to(packet, addr).await?;

    let mut buf = [0u8; 1024];
    match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, from))) => {
            log::trace!("ack of {len} bytes from {from}");
            Ok(())
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(HubError::SendTimeout { addr, timeout }),
    }
}

/// Something that can deliver an encoded command packet to the hub
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send(&self, packet: Vec<u8>) -> Result<(), HubError>;
}

/// Delivers commands over UDP. The hub address is resolved on first
/// use and then kept, including a failure to resolve it.
pub struct HubLink {
    locator: HubLocator,
    port: u16,
    discovery_timeout: Duration,
    send_timeout: Duration,
    addr: OnceCell<Result<IpAddr, HubError>>,
}

impl HubLink {
    pub fn new(locator: HubLocator) -> Self {
        Self {
            locator,
            port: HUB_PORT,
            discovery_timeout: DISCOVERY_TIMEOUT,
            send_timeout: SEND_TIMEOUT,
            addr: OnceCell::new(),
        }
    }

    /// Use a known address instead of discovering one
    pub fn with_address(self, addr: IpAddr) -> Self {
        Self {
            addr: OnceCell::new_with(Some(Ok(addr))),
            ..self
        }
    }

    pub fn with_port(self, port: u16) -> Self {
        Self { port, ..self }
    }

    pub fn with_timeouts(self, discovery: Duration, send: Duration) -> Self {
        Self {
            discovery_timeout: discovery,
            send_timeout: send,
            ..self
        }
    }

    pub async fn address(&self) -> Result<IpAddr, HubError> {
        self.addr
            .get_or_init(|| self.locator.discover(self.discovery_timeout))
            .await
            .clone()
    }
}

#[async_trait]
impl CommandTransport for HubLink {
    async fn send(&self, packet: Vec<u8>) -> Result<(), HubError> {
        let ip = self.address().await?;
        send_packet(&packet, SocketAddr::new(ip, self.port), self.send_timeout).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::settings::StaticSettings;

    const SHORT: Duration = Duration::from_millis(100);

    /// A loopback socket that never answers
    async fn silent_peer() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    /// A loopback socket that answers every datagram with `ok`
    async fn echo_peer() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((_, from)) = socket.recv_from(&mut buf).await {
                socket.send_to(b"ok", from).await.ok();
            }
        });
        addr
    }

    #[test]
    fn discovery_message() {
        assert_eq!(DISCOVERY_MESSAGE.len(), DISCOVERY_HEX.len() / 2);
        assert_eq!(&DISCOVERY_MESSAGE[0..3], &[0x01, 0x00, 0x03]);
    }

    #[tokio::test]
    async fn discover_replying_hub() {
        let peer = echo_peer().await;
        let locator = HubLocator::new(Arc::new(StaticSettings::new())).with_target(peer);
        assert_eq!(
            locator.discover(Duration::from_secs(2)).await.unwrap(),
            IpAddr::from(Ipv4Addr::LOCALHOST)
        );
    }

    #[tokio::test]
    async fn discover_falls_back_to_backup() {
        let peer = silent_peer().await;
        let settings = StaticSettings::new().with(SettingKind::BackupAddress, "10.0.0.5");
        let locator =
            HubLocator::new(Arc::new(settings)).with_target(peer.local_addr().unwrap());
        assert_eq!(
            locator.discover(SHORT).await.unwrap(),
            "10.0.0.5".parse::<IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn discover_times_out() {
        let peer = silent_peer().await;
        let locator = HubLocator::new(Arc::new(StaticSettings::new()))
            .with_target(peer.local_addr().unwrap());
        assert_eq!(
            locator.discover(SHORT).await.unwrap_err(),
            HubError::DiscoveryTimeout(SHORT)
        );
    }

    #[tokio::test]
    async fn send_is_acknowledged() {
        let peer = echo_peer().await;
        send_packet(b"hello", peer, Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_times_out() {
        let peer = silent_peer().await;
        let addr = peer.local_addr().unwrap();
        assert_eq!(
            send_packet(b"hello", addr, SHORT).await.unwrap_err(),
            HubError::SendTimeout {
                addr,
                timeout: SHORT
            }
        );
    }

    #[tokio::test]
    async fn link_remembers_failed_discovery() {
        let peer = silent_peer().await;
        let locator = HubLocator::new(Arc::new(StaticSettings::new()))
            .with_target(peer.local_addr().unwrap());
        let link = HubLink::new(locator).with_timeouts(SHORT, SHORT);
        for _ in 0..2 {
            assert_eq!(
                link.send(vec![1, 2, 3]).await.unwrap_err(),
                HubError::DiscoveryTimeout(SHORT)
            );
        }
    }

    #[tokio::test]
    async fn link_with_known_address() {
        let peer = echo_peer().await;
        let link = HubLink::new(HubLocator::new(Arc::new(StaticSettings::new())))
            .with_address(peer.ip())
            .with_port(peer.port());
        link.send(vec![1, 2, 3]).await.unwrap();
    }
}
