//! Netlink client abstraction.
//!
//! Defines [`NetlinkClient`] and the link/address/route/rule types the
//! local WireGuard backend works with. Production code uses
//! [`Rtnetlink`], which talks to the kernel over an `rtnetlink` socket.
//! Tests use stateful mocks.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use futures::TryStreamExt;
use ipnet::IpNet;
use rtnetlink::packet_route::address::{AddressAttribute, AddressMessage};
use rtnetlink::packet_route::link::{LinkAttribute, LinkMessage, State};
use rtnetlink::packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteScope, RouteType,
};
use rtnetlink::packet_route::rule::{RuleAction, RuleAttribute, RuleFlags, RuleMessage};
use rtnetlink::{IpVersion, LinkUnspec, LinkWireguard, RouteMessageBuilder};
use tracing::debug;

use crate::error::Error;

/// Kernel id of the main routing table.
pub const TABLE_MAIN: u32 = 254;
/// The kernel reports an unset suppress_prefixlength as -1.
const SUPPRESS_UNSET: u32 = u32::MAX;
const ENODEV: i32 = 19;

// ── Domain types ────────────────────────────────────────────────────

/// Address family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(net: &IpNet) -> Self {
        match net {
            IpNet::V4(_) => Self::V4,
            IpNet::V6(_) => Self::V6,
        }
    }

    fn default_route(self) -> IpNet {
        match self {
            Self::V4 => IpNet::V4(ipnet::Ipv4Net::default()),
            Self::V6 => IpNet::V6(ipnet::Ipv6Net::default()),
        }
    }

    fn ip_version(self) -> IpVersion {
        match self {
            Self::V4 => IpVersion::V4,
            Self::V6 => IpVersion::V6,
        }
    }
}

/// A network link as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub index: u32,
    pub name: String,
    pub mtu: u32,
    /// Kernel operational state (`UP`, `DOWN`, `UNKNOWN`, ...).
    pub oper_state: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl Link {
    /// WireGuard links report `UNKNOWN` while administratively up.
    pub fn is_up(&self) -> bool {
        matches!(self.oper_state.as_str(), "UP" | "UNKNOWN")
    }
}

/// A unicast route bound to one device in one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: IpNet,
    pub device: String,
    pub table: u32,
}

/// A policy routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub family: Family,
    pub priority: u32,
    pub table: u32,
    pub fwmark: Option<u32>,
    /// `not fwmark ...`
    pub invert: bool,
    pub suppress_prefixlen: Option<u32>,
}

// ── Trait ───────────────────────────────────────────────────────────

/// Link, address, route and rule operations.
#[async_trait]
pub trait NetlinkClient: Send + Sync {
    /// Create a link of kind `wireguard`.
    async fn link_add_wireguard(&self, name: &str) -> Result<(), Error>;
    async fn link_delete(&self, name: &str) -> Result<(), Error>;
    /// Fails with [`Error::LinkNotFound`] if the link does not exist.
    async fn link_by_name(&self, name: &str) -> Result<Link, Error>;
    async fn link_set_up(&self, name: &str) -> Result<(), Error>;
    async fn link_set_down(&self, name: &str) -> Result<(), Error>;
    async fn link_set_mtu(&self, name: &str, mtu: u32) -> Result<(), Error>;

    async fn addr_replace(&self, name: &str, addr: IpNet) -> Result<(), Error>;
    async fn addr_add(&self, name: &str, addr: IpNet) -> Result<(), Error>;
    async fn addr_list(&self, name: &str) -> Result<Vec<IpNet>, Error>;
    async fn addr_delete(&self, name: &str, addr: IpNet) -> Result<(), Error>;

    async fn route_add(&self, route: &Route) -> Result<(), Error>;
    async fn route_replace(&self, route: &Route) -> Result<(), Error>;
    async fn route_delete(&self, route: &Route) -> Result<(), Error>;
    /// Routes of `family` through `device`, across all tables.
    async fn route_list(&self, family: Family, device: &str) -> Result<Vec<Route>, Error>;

    async fn rule_add(&self, rule: &Rule) -> Result<(), Error>;
    /// Fails with [`Error::RuleNotFound`] if no installed rule matches.
    async fn rule_delete(&self, rule: &Rule) -> Result<(), Error>;
    async fn rule_list(&self, family: Family) -> Result<Vec<Rule>, Error>;
}

// ── rtnetlink implementation ────────────────────────────────────────

/// Production [`NetlinkClient`] backed by an `rtnetlink::Handle`.
#[derive(Clone)]
pub struct Rtnetlink {
    handle: rtnetlink::Handle,
}

impl Rtnetlink {
    /// Open a route socket. The connection task is spawned on the current
    /// runtime and ends once every handle is dropped.
    pub fn connect() -> Result<Self, Error> {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);
        Ok(Self { handle })
    }

    async fn link_message(&self, name: &str) -> Result<LinkMessage, Error> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_owned())
            .execute();
        match links.try_next().await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(Error::LinkNotFound {
                name: name.to_owned(),
            }),
            Err(e) => Err(on_link(name, e)),
        }
    }

    async fn index(&self, name: &str) -> Result<u32, Error> {
        Ok(self.link_message(name).await?.header.index)
    }

    async fn set_link(&self, name: &str, msg: LinkMessage) -> Result<(), Error> {
        self.handle
            .link()
            .set(msg)
            .execute()
            .await
            .map_err(|e| on_link(name, e))
    }

    async fn addr_messages(&self, name: &str) -> Result<Vec<AddressMessage>, Error> {
        let index = self.index(name).await?;
        self.handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute()
            .try_collect()
            .await
            .map_err(|e| on_link(name, e))
    }

    async fn rule_messages(&self, family: Family) -> Result<Vec<RuleMessage>, Error> {
        Ok(self
            .handle
            .rule()
            .get(family.ip_version())
            .execute()
            .try_collect()
            .await?)
    }

    async fn add_route(&self, route: &Route, replace: bool) -> Result<(), Error> {
        let index = self.index(&route.device).await?;
        let mut msg = route_message(route, index);
        msg.header.scope = RouteScope::Link;
        let request = self.handle.route().add(msg);
        let request = if replace { request.replace() } else { request };
        Ok(request.execute().await?)
    }
}

#[async_trait]
impl NetlinkClient for Rtnetlink {
    async fn link_add_wireguard(&self, name: &str) -> Result<(), Error> {
        self.handle
            .link()
            .add(LinkWireguard::new(name).build())
            .execute()
            .await?;
        debug!(link = name, "wireguard link added");
        Ok(())
    }

    async fn link_delete(&self, name: &str) -> Result<(), Error> {
        let index = self.index(name).await?;
        self.handle
            .link()
            .del(index)
            .execute()
            .await
            .map_err(|e| on_link(name, e))
    }

    async fn link_by_name(&self, name: &str) -> Result<Link, Error> {
        let msg = self.link_message(name).await?;
        Ok(to_link(&msg))
    }

    async fn link_set_up(&self, name: &str) -> Result<(), Error> {
        let index = self.index(name).await?;
        self.set_link(name, LinkUnspec::new_with_index(index).up().build())
            .await
    }

    async fn link_set_down(&self, name: &str) -> Result<(), Error> {
        let index = self.index(name).await?;
        self.set_link(name, LinkUnspec::new_with_index(index).down().build())
            .await
    }

    async fn link_set_mtu(&self, name: &str, mtu: u32) -> Result<(), Error> {
        let index = self.index(name).await?;
        self.set_link(name, LinkUnspec::new_with_index(index).mtu(mtu).build())
            .await
    }

    async fn addr_replace(&self, name: &str, addr: IpNet) -> Result<(), Error> {
        let index = self.index(name).await?;
        self.handle
            .address()
            .add(index, addr.addr(), addr.prefix_len())
            .replace()
            .execute()
            .await
            .map_err(|e| on_link(name, e))
    }

    async fn addr_add(&self, name: &str, addr: IpNet) -> Result<(), Error> {
        let index = self.index(name).await?;
        self.handle
            .address()
            .add(index, addr.addr(), addr.prefix_len())
            .execute()
            .await
            .map_err(|e| on_link(name, e))
    }

    async fn addr_list(&self, name: &str) -> Result<Vec<IpNet>, Error> {
        Ok(self
            .addr_messages(name)
            .await?
            .iter()
            .filter_map(to_ipnet)
            .collect())
    }

    async fn addr_delete(&self, name: &str, addr: IpNet) -> Result<(), Error> {
        let Some(msg) = self
            .addr_messages(name)
            .await?
            .into_iter()
            .find(|m| to_ipnet(m) == Some(addr))
        else {
            debug!(link = name, %addr, "address already absent");
            return Ok(());
        };
        self.handle
            .address()
            .del(msg)
            .execute()
            .await
            .map_err(|e| on_link(name, e))
    }

    async fn route_add(&self, route: &Route) -> Result<(), Error> {
        self.add_route(route, false).await
    }

    async fn route_replace(&self, route: &Route) -> Result<(), Error> {
        self.add_route(route, true).await
    }

    async fn route_delete(&self, route: &Route) -> Result<(), Error> {
        let index = self.index(&route.device).await?;
        Ok(self
            .handle
            .route()
            .del(route_message(route, index))
            .execute()
            .await?)
    }

    async fn route_list(&self, family: Family, device: &str) -> Result<Vec<Route>, Error> {
        let index = self.index(device).await?;
        let filter = match family {
            Family::V4 => RouteMessageBuilder::<Ipv4Addr>::default().build(),
            Family::V6 => RouteMessageBuilder::<Ipv6Addr>::default().build(),
        };
        let messages: Vec<RouteMessage> = self
            .handle
            .route()
            .get(filter)
            .execute()
            .try_collect()
            .await?;
        Ok(messages
            .iter()
            .filter_map(|m| to_route(m, family, index, device))
            .collect())
    }

    async fn rule_add(&self, rule: &Rule) -> Result<(), Error> {
        match rule.family {
            Family::V4 => {
                let mut request = self.handle.rule().add().v4();
                fill_rule(request.message_mut(), rule);
                request.execute().await?;
            }
            Family::V6 => {
                let mut request = self.handle.rule().add().v6();
                fill_rule(request.message_mut(), rule);
                request.execute().await?;
            }
        }
        Ok(())
    }

    async fn rule_delete(&self, rule: &Rule) -> Result<(), Error> {
        let msg = self
            .rule_messages(rule.family)
            .await?
            .into_iter()
            .find(|m| to_rule(m, rule.family).as_ref() == Some(rule))
            .ok_or(Error::RuleNotFound {
                priority: rule.priority,
                table: rule.table,
            })?;
        Ok(self.handle.rule().del(msg).execute().await?)
    }

    async fn rule_list(&self, family: Family) -> Result<Vec<Rule>, Error> {
        Ok(self
            .rule_messages(family)
            .await?
            .iter()
            .filter_map(|m| to_rule(m, family))
            .collect())
    }
}

/// Map `ENODEV` to [`Error::LinkNotFound`].
fn on_link(name: &str, err: rtnetlink::Error) -> Error {
    match &err {
        rtnetlink::Error::NetlinkError(msg) if msg.code.map(|c| -c.get()) == Some(ENODEV) => {
            Error::LinkNotFound {
                name: name.to_owned(),
            }
        }
        _ => Error::Netlink(err),
    }
}

// ── Message conversion ──────────────────────────────────────────────

fn to_link(msg: &LinkMessage) -> Link {
    let mut link = Link {
        index: msg.header.index,
        name: String::new(),
        mtu: 0,
        oper_state: "UNKNOWN".to_owned(),
        rx_bytes: 0,
        tx_bytes: 0,
    };
    for attr in &msg.attributes {
        match attr {
            LinkAttribute::IfName(name) => link.name.clone_from(name),
            LinkAttribute::Mtu(mtu) => link.mtu = *mtu,
            LinkAttribute::OperState(state) => {
                link.oper_state = match state {
                    State::Up => "UP".to_owned(),
                    State::Down => "DOWN".to_owned(),
                    State::Unknown => "UNKNOWN".to_owned(),
                    other => format!("{other:?}").to_uppercase(),
                };
            }
            LinkAttribute::Stats64(stats) => {
                link.rx_bytes = stats.rx_bytes;
                link.tx_bytes = stats.tx_bytes;
            }
            _ => {}
        }
    }
    link
}

/// Prefer the local address; `Address` is the peer on point-to-point links.
fn to_ipnet(msg: &AddressMessage) -> Option<IpNet> {
    let local = msg.attributes.iter().find_map(|a| match a {
        AddressAttribute::Local(ip) => Some(*ip),
        _ => None,
    });
    let addr = local.or_else(|| {
        msg.attributes.iter().find_map(|a| match a {
            AddressAttribute::Address(ip) => Some(*ip),
            _ => None,
        })
    })?;
    IpNet::new(addr, msg.header.prefix_len).ok()
}

fn route_message(route: &Route, index: u32) -> RouteMessage {
    match route.destination {
        IpNet::V4(net) => RouteMessageBuilder::<Ipv4Addr>::default()
            .destination_prefix(net.network(), net.prefix_len())
            .output_interface(index)
            .table_id(route.table)
            .build(),
        IpNet::V6(net) => RouteMessageBuilder::<Ipv6Addr>::default()
            .destination_prefix(net.network(), net.prefix_len())
            .output_interface(index)
            .table_id(route.table)
            .build(),
    }
}

/// Only unicast routes leaving through `index` are reported.
fn to_route(msg: &RouteMessage, family: Family, index: u32, device: &str) -> Option<Route> {
    if msg.header.kind != RouteType::Unicast {
        return None;
    }
    let mut oif = None;
    let mut table = u32::from(msg.header.table);
    let mut destination = None;
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Oif(idx) => oif = Some(*idx),
            RouteAttribute::Table(id) => table = *id,
            RouteAttribute::Destination(RouteAddress::Inet(ip)) => {
                destination = Some(IpAddr::V4(*ip));
            }
            RouteAttribute::Destination(RouteAddress::Inet6(ip)) => {
                destination = Some(IpAddr::V6(*ip));
            }
            _ => {}
        }
    }
    if oif != Some(index) {
        return None;
    }
    let destination = match destination {
        Some(ip) => IpNet::new(ip, msg.header.destination_prefix_length).ok()?,
        None => family.default_route(),
    };
    Some(Route {
        destination,
        device: device.to_owned(),
        table,
    })
}

fn fill_rule(msg: &mut RuleMessage, rule: &Rule) {
    msg.header.action = RuleAction::ToTable;
    // tables above 255 only fit the attribute
    msg.header.table = u8::try_from(rule.table).unwrap_or(0);
    if rule.invert {
        msg.header.flags.insert(RuleFlags::Invert);
    }
    msg.attributes.retain(|a| !matches!(a, RuleAttribute::Table(_)));
    msg.attributes.push(RuleAttribute::Table(rule.table));
    msg.attributes.push(RuleAttribute::Priority(rule.priority));
    if let Some(mark) = rule.fwmark {
        msg.attributes.push(RuleAttribute::FwMark(mark));
    }
    if let Some(len) = rule.suppress_prefixlen {
        msg.attributes.push(RuleAttribute::SuppressPrefixLen(len));
    }
}

/// `None` for rules that do not look up a table.
fn to_rule(msg: &RuleMessage, family: Family) -> Option<Rule> {
    if msg.header.action != RuleAction::ToTable {
        return None;
    }
    let mut rule = Rule {
        family,
        priority: 0,
        table: u32::from(msg.header.table),
        fwmark: None,
        invert: msg.header.flags.contains(RuleFlags::Invert),
        suppress_prefixlen: None,
    };
    for attr in &msg.attributes {
        match attr {
            RuleAttribute::Priority(prio) => rule.priority = *prio,
            RuleAttribute::Table(table) => rule.table = *table,
            RuleAttribute::FwMark(mark) => rule.fwmark = Some(*mark),
            RuleAttribute::SuppressPrefixLen(len) if *len != SUPPRESS_UNSET => {
                rule.suppress_prefixlen = Some(*len);
            }
            _ => {}
        }
    }
    Some(rule)
}
