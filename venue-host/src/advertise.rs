use std::sync::Mutex;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{info, warn};

use crate::error::HostError;

const SERVICE_TYPE: &str = "_audiowallet._tcp.local.";

/// Starts and stops the mDNS advertisement of this host. The dispatcher and
/// registry never touch this trait directly — only the host process does,
/// at startup and shutdown.
pub trait ServiceAdvertiser: Send + Sync {
    fn start(&self, port: u16) -> Result<(), HostError>;
    fn stop(&self);
}

/// Advertises `_audiowallet._tcp` via `mdns-sd`, with TXT records `v`,
/// `room` and `relay`.
pub struct MdnsAdvertiser {
    instance_name: String,
    room_name: String,
    registration: Mutex<Option<(ServiceDaemon, String)>>,
}

impl MdnsAdvertiser {
    #[must_use]
    pub fn new(instance_name: String, room_name: String) -> Self {
        Self {
            instance_name,
            room_name,
            registration: Mutex::new(None),
        }
    }

    fn host_label(&self) -> String {
        let sanitized: String = self
            .instance_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("{sanitized}.local.")
    }
}

impl ServiceAdvertiser for MdnsAdvertiser {
    fn start(&self, port: u16) -> Result<(), HostError> {
        let daemon = ServiceDaemon::new().map_err(|err| HostError::Advertiser(err.to_string()))?;

        let properties: [(&str, &str); 3] =
            [("v", "1"), ("room", self.room_name.as_str()), ("relay", "1")];

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &self.instance_name,
            &self.host_label(),
            (),
            port,
            properties.as_slice(),
        )
        .map_err(|err| HostError::Advertiser(err.to_string()))?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_owned();
        daemon
            .register(service)
            .map_err(|err| HostError::Advertiser(err.to_string()))?;

        info!("advertising mDNS service `{}` on port {}", fullname, port);
        *self.registration.lock().unwrap_or_else(|e| e.into_inner()) = Some((daemon, fullname));
        Ok(())
    }

    fn stop(&self) {
        let Some((daemon, fullname)) =
            self.registration.lock().unwrap_or_else(|e| e.into_inner()).take()
        else {
            return;
        };

        if let Err(err) = daemon.unregister(&fullname).map(|recv| recv.recv()) {
            warn!("failed to unregister mDNS service `{}`: {}", fullname, err);
        }
        if let Err(err) = daemon.shutdown() {
            warn!("failed to shut down mDNS daemon: {}", err);
        }
    }
}
