// ── Backend extras ──
//
// Bookkeeping a backend attaches to physical objects and stored configs
// (remote ids, comments, disable flags). Everything outside the owning
// backend carries these values without looking inside.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum InterfaceExtras {
    Pfsense(PfsenseInterfaceExtras),
    Mikrotik(MikrotikInterfaceExtras),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum PeerExtras {
    Local(LocalPeerExtras),
    Pfsense(PfsensePeerExtras),
    Mikrotik(MikrotikPeerExtras),
}

/// Kernel peers have no disable flag; a disabled peer is removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalPeerExtras {
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PfsenseInterfaceExtras {
    /// Remote tunnel id assigned by the appliance.
    pub id: String,
    pub comment: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PfsensePeerExtras {
    pub id: String,
    pub name: String,
    pub comment: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MikrotikInterfaceExtras {
    /// RouterOS `.id` of the wireguard interface.
    pub id: String,
    pub comment: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MikrotikPeerExtras {
    pub id: String,
    pub name: String,
    pub comment: String,
    /// Responder peers never initiate, so no endpoint is pushed.
    pub is_responder: bool,
    pub disabled: bool,
    pub client_endpoint: String,
    pub client_address: String,
    pub client_dns: String,
    /// Seconds.
    pub client_keepalive: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extras_are_tagged_by_backend() {
        let extras = PeerExtras::Local(LocalPeerExtras { disabled: true });
        let json = serde_json::to_value(&extras).unwrap();
        assert_eq!(json["backend"], "local");
        assert_eq!(json["disabled"], true);

        let back: PeerExtras = serde_json::from_value(json).unwrap();
        assert_eq!(back, extras);
    }
}
