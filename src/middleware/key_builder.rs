use actix_web::dev::ServiceRequest;
use actix_web::ResponseError;
use std::future::{ready, Ready};
use std::net::{AddrParseError, IpAddr, Ipv6Addr};
use thiserror::Error;

type KeyPartFn = Box<dyn Fn(&ServiceRequest) -> Result<String, actix_web::Error>>;

pub type KeyFuture = Ready<Result<String, actix_web::Error>>;

enum Component {
    Fixed(String),
    RealIp,
    PeerIp,
    Path,
    Custom(KeyPartFn),
}

/// Assembles a key function for the [RateLimit](crate::RateLimit) middleware.
///
/// Each call appends one component; the key is the components joined with `-`, in the order they
/// were added. With no components every request shares the empty key.
///
/// The limiter strips everything outside `[A-Za-z0-9_-]` from the key (unless configured with
/// [KeyEncoding::Sha256](crate::KeyEncoding::Sha256)), so dots and colons in addresses and slashes
/// in paths do not survive into storage.
///
/// For a key that needs an asynchronous lookup, pass your own function to
/// [RateLimit::builder](crate::RateLimit::builder) instead.
#[derive(Default)]
pub struct KeyFunctionBuilder {
    components: Vec<Component>,
}

impl KeyFunctionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fixed component, e.g. `login` to keep login attempts apart from other limited routes.
    pub fn custom_key(mut self, key: &str) -> Self {
        self.components.push(Component::Fixed(key.to_owned()));
        self
    }

    /// The client address as reported by
    /// [ConnectionInfo::realip_remote_addr()](actix_web::dev::ConnectionInfo::realip_remote_addr).
    ///
    /// That value comes from `Forwarded`/`X-Forwarded-For` when present, which any client can
    /// set. Only use it behind a reverse proxy you control. IPv6 addresses are grouped per /64.
    pub fn real_ip_key(mut self) -> Self {
        self.components.push(Component::RealIp);
        self
    }

    /// The socket peer address, for applications that clients reach directly.
    /// IPv6 addresses are grouped per /64.
    pub fn peer_ip_key(mut self) -> Self {
        self.components.push(Component::PeerIp);
        self
    }

    pub fn path_key(mut self) -> Self {
        self.components.push(Component::Path);
        self
    }

    /// A component computed from the request. An error is returned to the client as is.
    pub fn custom_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServiceRequest) -> Result<String, actix_web::Error> + 'static,
    {
        self.components.push(Component::Custom(Box::new(f)));
        self
    }

    pub fn build(self) -> impl Fn(&ServiceRequest) -> KeyFuture + 'static {
        move |req| ready(self.key_for(req))
    }

    fn key_for(&self, req: &ServiceRequest) -> Result<String, actix_web::Error> {
        let mut parts = Vec::with_capacity(self.components.len());
        for component in &self.components {
            let part = match component {
                Component::Fixed(key) => key.clone(),
                Component::RealIp => {
                    let info = req.connection_info();
                    ip_key(info.realip_remote_addr().ok_or(Error::MissingAddress)?)?
                }
                Component::PeerIp => {
                    let info = req.connection_info();
                    ip_key(info.peer_addr().ok_or(Error::MissingAddress)?)?
                }
                Component::Path => req.path().to_owned(),
                Component::Custom(f) => f(req)?,
            };
            parts.push(part);
        }
        Ok(parts.join("-"))
    }
}

#[derive(Debug, Error)]
enum Error {
    #[error("Client address is not a valid IP: {0}")]
    InvalidIp(
        #[source]
        #[from]
        AddrParseError,
    ),
    #[error("Client address is not available")]
    MissingAddress,
}

impl ResponseError for Error {}

/// IPv4 (and IPv4-mapped IPv6) addresses are kept whole, other IPv6 addresses are truncated to
/// their /64 prefix, which is what a single host usually controls.
fn ip_key(addr: &str) -> Result<String, Error> {
    match addr.parse::<IpAddr>()? {
        IpAddr::V4(v4) => Ok(v4.to_string()),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => Ok(v4.to_string()),
            None => {
                let [a, b, c, d, ..] = v6.segments();
                Ok(format!("{}/64", Ipv6Addr::new(a, b, c, d, 0, 0, 0, 0)))
            }
        },
    }
}
