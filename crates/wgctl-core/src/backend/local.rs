// ── Local kernel backend ──
//
// Drives a WireGuard device on this host through the device-control
// client, with links, addresses, routes and rules through netlink.
// Hooks, resolvconf and ping go through the shell runner.

use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use wgctl_api::netlink::TABLE_MAIN;
use wgctl_api::shell::args;
use wgctl_api::wgctrl::{Device, DeviceConfig, Peer, PeerConfig as DevicePeerConfig};
use wgctl_api::{
    Family, KernelWireGuard, NetlinkClient, Route, Rtnetlink, Rule, ShellRunner, SystemShell,
    WireGuardClient,
};

use super::{ControllerBackend, InterfaceTransform, PeerTransform, is_ignored};
use crate::config::LocalBackendConfig;
use crate::error::CoreError;
use crate::model::{
    BackendKind, Cidr, InterfaceBackend, InterfaceConfig, InterfaceExtras, InterfaceIdentifier,
    KeyPair, LocalPeerExtras, PeerConfig, PeerExtras, PeerIdentifier, PhysicalInterface,
    PhysicalPeer, PingResult, PresharedKey, RoutingTableInfo,
};

const IMPORT_SOURCE: &str = "wgctrl";
const LINK_KIND: &str = "wireguard";
/// wg-quick places its fwmark rule just below the default main rule.
const MARK_RULE_PRIORITY_START: u32 = 32_700;

pub struct LocalBackend {
    id: InterfaceBackend,
    wg: Arc<dyn WireGuardClient>,
    nl: Arc<dyn NetlinkClient>,
    shell: Arc<dyn ShellRunner>,
    cfg: LocalBackendConfig,
}

impl LocalBackend {
    pub fn new(
        wg: Arc<dyn WireGuardClient>,
        nl: Arc<dyn NetlinkClient>,
        shell: Arc<dyn ShellRunner>,
        cfg: LocalBackendConfig,
    ) -> Self {
        Self {
            id: InterfaceBackend::local(),
            wg,
            nl,
            shell,
            cfg,
        }
    }

    /// Backend wired to the kernel. Opens a route socket, so it must be
    /// called inside a Tokio runtime.
    pub fn system(cfg: LocalBackendConfig) -> Result<Self, CoreError> {
        let nl = Rtnetlink::connect().map_err(CoreError::low_level("open netlink socket"))?;
        let shell: Arc<dyn ShellRunner> = Arc::new(SystemShell::new(cfg.command_timeout));
        Ok(Self::new(Arc::new(KernelWireGuard::new()), Arc::new(nl), shell, cfg))
    }

    // ── Conversion ───────────────────────────────────────────────────

    async fn convert_interface(&self, device: Device) -> Result<PhysicalInterface, CoreError> {
        let link = self
            .nl
            .link_by_name(&device.name)
            .await
            .map_err(CoreError::low_level(format!("read link {}", device.name)))?;
        let addresses = self
            .nl
            .addr_list(&device.name)
            .await
            .map_err(CoreError::low_level(format!("list addresses of {}", device.name)))?;

        Ok(PhysicalInterface {
            identifier: InterfaceIdentifier::new(device.name),
            key_pair: KeyPair {
                private_key: device.private_key.unwrap_or_default(),
                public_key: device.public_key.unwrap_or_default(),
            },
            listen_port: device.listen_port,
            addresses: addresses.into_iter().map(Cidr::from).collect(),
            mtu: link.mtu,
            firewall_mark: device.firewall_mark,
            device_up: link.is_up(),
            import_source: IMPORT_SOURCE.into(),
            device_type: LINK_KIND.into(),
            bytes_upload: link.tx_bytes,
            bytes_download: link.rx_bytes,
            extras: None,
        })
    }

    async fn device(&self, id: &InterfaceIdentifier) -> Result<Device, CoreError> {
        self.wg
            .device(id.as_str())
            .await
            .map_err(CoreError::low_level(format!("read device {id}")))
    }

    async fn find_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
    ) -> Result<Option<PhysicalPeer>, CoreError> {
        Ok(self
            .device(device)
            .await?
            .peers
            .into_iter()
            .find(|p| p.public_key == id.as_str())
            .map(convert_peer))
    }

    async fn configure(&self, id: &InterfaceIdentifier, config: &DeviceConfig) -> Result<(), CoreError> {
        self.wg
            .configure_device(id.as_str(), config)
            .await
            .map_err(CoreError::low_level(format!("configure device {id}")))
    }

    // ── Interface plumbing ───────────────────────────────────────────

    async fn get_or_create_interface(
        &self,
        id: &InterfaceIdentifier,
    ) -> Result<PhysicalInterface, CoreError> {
        match self.get_interface(id).await {
            Ok(pi) => Ok(pi),
            Err(e) if e.is_not_found() => {
                self.create_link(id).await?;
                self.get_interface(id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn create_link(&self, id: &InterfaceIdentifier) -> Result<(), CoreError> {
        self.nl
            .link_add_wireguard(id.as_str())
            .await
            .map_err(CoreError::low_level(format!("create link {id}")))?;
        self.nl
            .link_set_up(id.as_str())
            .await
            .map_err(CoreError::low_level(format!("bring up link {id}")))?;
        info!(interface = %id, "created wireguard link");
        Ok(())
    }

    async fn update_interface(&self, pi: &PhysicalInterface) -> Result<(), CoreError> {
        let name = pi.identifier.as_str();

        if pi.mtu != 0 {
            self.nl
                .link_set_mtu(name, pi.mtu)
                .await
                .map_err(CoreError::low_level(format!("set mtu of {name}")))?;
        }

        self.update_addresses(name, &pi.addresses).await?;

        let config = DeviceConfig {
            private_key: pi
                .key_pair
                .has_private_key()
                .then(|| pi.key_pair.private_key.clone()),
            listen_port: Some(pi.listen_port),
            firewall_mark: (pi.firewall_mark != 0).then_some(pi.firewall_mark),
            peers: Vec::new(),
        };
        self.configure(&pi.identifier, &config).await?;

        let state = if pi.device_up {
            self.nl.link_set_up(name).await
        } else {
            self.nl.link_set_down(name).await
        };
        state.map_err(CoreError::low_level(format!("set link state of {name}")))
    }

    /// First address replaces, the others are added, stale ones removed.
    async fn update_addresses(&self, name: &str, desired: &[Cidr]) -> Result<(), CoreError> {
        let current = self
            .nl
            .addr_list(name)
            .await
            .map_err(CoreError::low_level(format!("list addresses of {name}")))?;

        for (i, addr) in desired.iter().enumerate() {
            let net = addr.to_ipnet();
            let result = if i == 0 {
                self.nl.addr_replace(name, net).await
            } else if current.contains(&net) {
                continue;
            } else {
                self.nl.addr_add(name, net).await
            };
            result.map_err(CoreError::low_level(format!("assign {addr} to {name}")))?;
        }

        let desired: HashSet<IpNet> = desired.iter().map(Cidr::to_ipnet).collect();
        for stale in current.into_iter().filter(|a| !desired.contains(a)) {
            debug!(interface = name, address = %stale, "removing stale address");
            self.nl
                .addr_delete(name, stale)
                .await
                .map_err(CoreError::low_level(format!("remove {stale} from {name}")))?;
        }
        Ok(())
    }

    // ── Peer plumbing ────────────────────────────────────────────────

    async fn get_or_create_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
    ) -> Result<PhysicalPeer, CoreError> {
        if let Some(pp) = self.find_peer(device, id).await? {
            return Ok(pp);
        }

        let config = DeviceConfig {
            peers: vec![DevicePeerConfig {
                public_key: id.to_string(),
                ..DevicePeerConfig::default()
            }],
            ..DeviceConfig::default()
        };
        self.configure(device, &config).await?;
        debug!(interface = %device, peer = %id, "created peer");

        self.find_peer(device, id)
            .await?
            .ok_or_else(|| CoreError::not_found("peer", id))
    }

    async fn update_peer(&self, device: &InterfaceIdentifier, pp: &PhysicalPeer) -> Result<(), CoreError> {
        let disabled = matches!(&pp.extras, Some(PeerExtras::Local(extras)) if extras.disabled);
        if disabled {
            debug!(interface = %device, peer = %pp.identifier, "peer disabled, removing from device");
            return self.remove_peer(device, &pp.identifier).await;
        }

        let peer = DevicePeerConfig {
            public_key: pp.identifier.to_string(),
            remove: false,
            update_only: true,
            preshared_key: Some(
                pp.preshared_key
                    .as_ref()
                    .map(|k| k.as_str().to_owned())
                    .unwrap_or_default(),
            ),
            endpoint: (!pp.endpoint.is_empty()).then(|| pp.endpoint.clone()),
            persistent_keepalive: Some(u16::try_from(pp.persistent_keepalive).unwrap_or(u16::MAX)),
            allowed_ips: Some(pp.allowed_ips.iter().map(Cidr::to_ipnet).collect()),
        };
        let config = DeviceConfig {
            peers: vec![peer],
            ..DeviceConfig::default()
        };
        self.configure(device, &config).await
    }

    async fn remove_peer(&self, device: &InterfaceIdentifier, id: &PeerIdentifier) -> Result<(), CoreError> {
        let config = DeviceConfig {
            peers: vec![DevicePeerConfig {
                public_key: id.to_string(),
                remove: true,
                ..DevicePeerConfig::default()
            }],
            ..DeviceConfig::default()
        };
        self.configure(device, &config).await
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Firewall mark and table for `info`, derived from the link index when unset.
    async fn resolve_table(&self, info: &RoutingTableInfo) -> Result<(u32, u32), CoreError> {
        let mut fw_mark = info.fw_mark;
        if fw_mark == 0 {
            let link = self
                .nl
                .link_by_name(info.interface.as_str())
                .await
                .map_err(CoreError::low_level(format!("read link {}", info.interface)))?;
            fw_mark = self.cfg.route_table_offset + link.index;
        }
        let table = match u32::try_from(info.table) {
            Ok(0) | Err(_) => fw_mark,
            Ok(table) => table,
        };
        Ok((fw_mark, table))
    }

    async fn set_family_routes(
        &self,
        info: &RoutingTableInfo,
        family: Family,
        fw_mark: u32,
        table: u32,
        cidrs: &[Cidr],
    ) -> Result<(), CoreError> {
        let device = info.interface.as_str();
        let desired: Vec<IpNet> = cidrs.iter().map(|c| c.network().to_ipnet()).collect();

        for destination in &desired {
            let route = Route {
                destination: *destination,
                device: device.to_owned(),
                table,
            };
            self.nl
                .route_replace(&route)
                .await
                .map_err(CoreError::low_level(format!("add route {destination} via {device}")))?;
        }

        let existing = self
            .nl
            .route_list(family, device)
            .await
            .map_err(CoreError::low_level(format!("list routes of {device}")))?;
        for route in existing
            .into_iter()
            .filter(|r| r.table == table && !desired.contains(&r.destination))
        {
            debug!(interface = device, route = %route.destination, table, "removing stale route");
            self.nl
                .route_delete(&route)
                .await
                .map_err(CoreError::low_level(format!("remove route {}", route.destination)))?;
        }

        if table == TABLE_MAIN {
            return Ok(());
        }
        if desired.is_empty() {
            return self.delete_table_rules(family, table).await;
        }

        let rules = self
            .nl
            .rule_list(family)
            .await
            .map_err(CoreError::low_level("list routing rules"))?;

        let has_mark_rule = rules
            .iter()
            .any(|r| r.table == table && r.invert && r.fwmark == Some(fw_mark));
        if !has_mark_rule {
            let priority = free_priority(&rules, MARK_RULE_PRIORITY_START, false)?;
            let rule = Rule {
                family,
                priority,
                table,
                fwmark: Some(fw_mark),
                invert: true,
                suppress_prefixlen: None,
            };
            self.nl
                .rule_add(&rule)
                .await
                .map_err(CoreError::low_level(format!("add fwmark rule for table {table}")))?;
            debug!(interface = device, table, fw_mark, priority, "added fwmark rule");
        }

        if Cidr::contains_default_route(cidrs) {
            self.ensure_main_rule(family, &rules).await?;
        }
        Ok(())
    }

    /// Exactly one `lookup main suppress_prefixlength 0` rule at or above
    /// the configured priority offset.
    async fn ensure_main_rule(&self, family: Family, rules: &[Rule]) -> Result<(), CoreError> {
        let offset = self.cfg.rule_prio_offset;
        let mut main_rules = rules.iter().filter(|r| {
            r.table == TABLE_MAIN && r.suppress_prefixlen == Some(0) && r.priority >= offset
        });

        if main_rules.next().is_none() {
            let rule = Rule {
                family,
                priority: free_priority(rules, offset, true)?,
                table: TABLE_MAIN,
                fwmark: None,
                invert: false,
                suppress_prefixlen: Some(0),
            };
            return self
                .nl
                .rule_add(&rule)
                .await
                .map_err(CoreError::low_level("add main suppress rule"));
        }

        for extra in main_rules {
            self.nl
                .rule_delete(extra)
                .await
                .map_err(CoreError::low_level("remove duplicate main rule"))?;
        }
        Ok(())
    }

    async fn delete_table_rules(&self, family: Family, table: u32) -> Result<(), CoreError> {
        let rules = self
            .nl
            .rule_list(family)
            .await
            .map_err(CoreError::low_level("list routing rules"))?;
        for rule in rules.iter().filter(|r| r.table == table) {
            self.nl
                .rule_delete(rule)
                .await
                .map_err(CoreError::low_level(format!("remove rule for table {table}")))?;
        }
        Ok(())
    }

    async fn run(&self, program: &str, argv: &[String], stdin: Option<&str>) -> Result<String, CoreError> {
        debug!(program, args = ?argv, "running command");
        self.shell
            .run(program, argv, stdin)
            .await
            .and_then(|out| out.into_stdout(program))
            .map_err(CoreError::low_level(format!("run {program}")))
    }

    fn resolvconf_name(&self, id: &InterfaceIdentifier) -> String {
        format!("{}{id}", self.cfg.resolvconf_prefix)
    }
}

fn convert_peer(peer: Peer) -> PhysicalPeer {
    PhysicalPeer {
        identifier: PeerIdentifier::new(peer.public_key.clone()),
        endpoint: peer.endpoint.unwrap_or_default(),
        allowed_ips: peer.allowed_ips.into_iter().map(Cidr::from).collect(),
        key_pair: KeyPair::public_only(peer.public_key),
        preshared_key: peer.preshared_key.and_then(PresharedKey::non_empty),
        persistent_keepalive: u32::from(peer.persistent_keepalive),
        last_handshake: peer.last_handshake,
        protocol_version: peer.protocol_version,
        bytes_upload: peer.tx_bytes,
        bytes_download: peer.rx_bytes,
        import_source: IMPORT_SOURCE.into(),
        extras: Some(PeerExtras::Local(LocalPeerExtras { disabled: false })),
    }
}

/// First priority not taken by any rule, walking down (or up) from `start`.
fn free_priority(rules: &[Rule], start: u32, upwards: bool) -> Result<u32, CoreError> {
    let taken: HashSet<u32> = rules.iter().map(|r| r.priority).collect();
    let mut priority = start;
    while taken.contains(&priority) {
        priority = if upwards {
            priority.checked_add(1)
        } else {
            priority.checked_sub(1)
        }
        .ok_or_else(|| CoreError::Internal("no free routing rule priority".into()))?;
    }
    Ok(priority)
}

/// Statistics from `ping -c N` output.
fn parse_ping(output: &str) -> Option<PingResult> {
    let stats = output.lines().find(|l| l.contains("packets transmitted"))?;
    let mut numbers = stats
        .split(',')
        .filter_map(|part| part.split_whitespace().next()?.parse::<u32>().ok());
    let packets_sent = numbers.next()?;
    let packets_recv = numbers.next()?;

    let rtts = output
        .lines()
        .filter_map(|line| {
            let time = line.split("time=").nth(1)?;
            let ms: f64 = time.split_whitespace().next()?.parse().ok()?;
            Some(Duration::from_secs_f64(ms / 1000.0))
        })
        .collect();

    Some(PingResult {
        packets_sent,
        packets_recv,
        rtts,
    })
}

#[async_trait]
impl ControllerBackend for LocalBackend {
    fn id(&self) -> &InterfaceBackend {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get_interfaces(&self) -> Result<Vec<PhysicalInterface>, CoreError> {
        let devices = self
            .wg
            .devices()
            .await
            .map_err(CoreError::low_level("list wireguard devices"))?;

        let mut interfaces = Vec::with_capacity(devices.len());
        for device in devices {
            let name = InterfaceIdentifier::new(device.name.clone());
            if is_ignored(&self.cfg.ignored_interfaces, &name) {
                debug!(interface = %name, "skipping ignored interface");
                continue;
            }
            interfaces.push(self.convert_interface(device).await?);
        }
        Ok(interfaces)
    }

    async fn get_interface(&self, id: &InterfaceIdentifier) -> Result<PhysicalInterface, CoreError> {
        let device = self.device(id).await?;
        self.convert_interface(device).await
    }

    async fn get_peers(&self, device: &InterfaceIdentifier) -> Result<Vec<PhysicalPeer>, CoreError> {
        Ok(self
            .device(device)
            .await?
            .peers
            .into_iter()
            .map(convert_peer)
            .collect())
    }

    async fn save_interface(
        &self,
        id: &InterfaceIdentifier,
        transform: InterfaceTransform,
    ) -> Result<(), CoreError> {
        let pi = self.get_or_create_interface(id).await?;
        let pi = transform(pi)?;
        self.update_interface(&pi).await
    }

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), CoreError> {
        match self.nl.link_delete(id.as_str()).await {
            Ok(()) => {
                info!(interface = %id, "deleted wireguard link");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(CoreError::low_level(format!("delete link {id}"))(e)),
        }
    }

    async fn save_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
        transform: PeerTransform,
    ) -> Result<(), CoreError> {
        id.ensure_public_key()?;
        let pp = self.get_or_create_peer(device, id).await?;
        let mut pp = transform(pp)?;
        pp.identifier = id.clone();
        self.update_peer(device, &pp).await
    }

    async fn delete_peer(
        &self,
        device: &InterfaceIdentifier,
        id: &PeerIdentifier,
    ) -> Result<(), CoreError> {
        id.ensure_public_key()?;
        match self.remove_peer(device, id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn execute_interface_hook(
        &self,
        id: &InterfaceIdentifier,
        command: &str,
    ) -> Result<(), CoreError> {
        if command.trim().is_empty() {
            return Ok(());
        }
        let command = command
            .replace("%resPref", &self.cfg.resolvconf_prefix)
            .replace("%i", id.as_str());
        info!(interface = %id, command = %command, "executing interface hook");
        self.run("bash", &args(["-ce", command.as_str()]), None)
            .await
            .map(drop)
    }

    async fn set_dns(
        &self,
        id: &InterfaceIdentifier,
        dns: &str,
        search: &str,
    ) -> Result<(), CoreError> {
        let servers = split_list(dns);
        let domains = split_list(search);
        if servers.is_empty() && domains.is_empty() {
            return Ok(());
        }

        let mut input = String::new();
        for server in servers {
            input.push_str(&format!("nameserver {server}\n"));
        }
        for domain in domains {
            input.push_str(&format!("search {domain}\n"));
        }

        let name = self.resolvconf_name(id);
        self.run("resolvconf", &args(["-a", name.as_str(), "-m", "0", "-x"]), Some(&input))
            .await
            .map(drop)
    }

    async fn unset_dns(
        &self,
        id: &InterfaceIdentifier,
        dns: &str,
        search: &str,
    ) -> Result<(), CoreError> {
        if split_list(dns).is_empty() && split_list(search).is_empty() {
            return Ok(());
        }
        let name = self.resolvconf_name(id);
        self.run("resolvconf", &args(["-d", name.as_str(), "-f"]), None)
            .await
            .map(drop)
    }

    async fn set_routes(&self, info: &RoutingTableInfo) -> Result<(), CoreError> {
        if info.is_disabled() {
            debug!(interface = %info.interface, "routing management disabled");
            return Ok(());
        }

        let (fw_mark, table) = self.resolve_table(info).await?;

        let device = self.device(&info.interface).await?;
        if device.firewall_mark != fw_mark {
            let config = DeviceConfig {
                firewall_mark: Some(fw_mark),
                ..DeviceConfig::default()
            };
            self.configure(&info.interface, &config).await?;
        }

        let (v4, v6) = Cidr::per_family(&info.allowed_ips);
        self.set_family_routes(info, Family::V4, fw_mark, table, &v4)
            .await?;
        self.set_family_routes(info, Family::V6, fw_mark, table, &v6)
            .await?;
        info!(interface = %info.interface, table, fw_mark, routes = info.allowed_ips.len(), "routes updated");
        Ok(())
    }

    async fn remove_routes(&self, info: &RoutingTableInfo) -> Result<(), CoreError> {
        if info.is_disabled() {
            return Ok(());
        }
        let (_, table) = match self.resolve_table(info).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_not_found() => {
                debug!(interface = %info.interface, "link gone, no routes to remove");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for family in [Family::V4, Family::V6] {
            if table != TABLE_MAIN {
                self.delete_table_rules(family, table).await?;
            }
            let routes = match self.nl.route_list(family, info.interface.as_str()).await {
                Ok(routes) => routes,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(CoreError::low_level("list routes")(e)),
            };
            for route in routes.iter().filter(|r| r.table == table) {
                self.nl
                    .route_delete(route)
                    .await
                    .map_err(CoreError::low_level(format!("remove route {}", route.destination)))?;
            }
        }
        info!(interface = %info.interface, table, "routes removed");
        Ok(())
    }

    async fn ping_addresses(&self, addr: &str) -> Result<PingResult, CoreError> {
        let argv = args(["-c", "1", "-W", "2", addr]);
        let output = self
            .shell
            .run("ping", &argv, None)
            .await
            .map_err(CoreError::low_level(format!("ping {addr}")))?;

        match parse_ping(&output.stdout) {
            Some(result) => Ok(result),
            None => {
                warn!(address = addr, stderr = %output.stderr.trim(), "unparseable ping output");
                output
                    .into_stdout("ping")
                    .map_err(CoreError::low_level(format!("ping {addr}")))?;
                Ok(PingResult {
                    packets_sent: 1,
                    ..PingResult::default()
                })
            }
        }
    }

    fn interface_extras(&self, _cfg: &InterfaceConfig) -> Option<InterfaceExtras> {
        None
    }

    fn peer_extras(&self, peer: &PeerConfig) -> Option<PeerExtras> {
        Some(PeerExtras::Local(LocalPeerExtras {
            disabled: peer.is_disabled(),
        }))
    }
}

fn split_list(list: &str) -> Vec<&str> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
