//! Layer-3 addressing learned for an entity.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentBase};
use crate::element::{ElementId, ElementType, FieldId};
use crate::error::Result;
use crate::registry::FieldRegistry;
use crate::store::ElementStore;

/// How an address was learned. Stored as its `i32` discriminant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum IpDataType {
    #[default]
    Unknown = 0,
    Factory = 1,
    Udp = 2,
    Arp = 3,
    Tcp = 4,
    Dhcp = 5,
}

impl IpDataType {
    /// Decode a stored discriminant; anything unrecognised is `Unknown`.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Factory,
            2 => Self::Udp,
            3 => Self::Arp,
            4 => Self::Tcp,
            5 => Self::Dhcp,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for IpDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Factory => "factory",
            Self::Udp => "udp",
            Self::Arp => "arp",
            Self::Tcp => "tcp",
            Self::Dhcp => "dhcp",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpDataFields {
    pub ip_type: FieldId,
    pub ip_addr_block: FieldId,
    pub ip_netmask: FieldId,
    pub ip_gateway: FieldId,
}

/// Address, netmask and gateway, each held as a `u64`.
#[derive(Debug, Clone, Copy)]
pub struct IpData {
    base: ComponentBase,
    ip_type: ElementId,
    ip_addr_block: ElementId,
    ip_netmask: ElementId,
    ip_gateway: ElementId,
}

impl IpData {
    pub fn ip_type(&self, store: &ElementStore) -> Result<IpDataType> {
        Ok(IpDataType::from_raw(store.get::<i32>(self.ip_type)?))
    }

    pub fn set_ip_type(&self, store: &mut ElementStore, kind: IpDataType) -> Result<()> {
        store.set(self.ip_type, kind.as_raw())
    }

    pub fn address(&self, store: &ElementStore) -> Result<u64> {
        store.get(self.ip_addr_block)
    }

    pub fn set_address(&self, store: &mut ElementStore, addr: u64) -> Result<()> {
        store.set(self.ip_addr_block, addr)
    }

    pub fn netmask(&self, store: &ElementStore) -> Result<u64> {
        store.get(self.ip_netmask)
    }

    pub fn set_netmask(&self, store: &mut ElementStore, mask: u64) -> Result<()> {
        store.set(self.ip_netmask, mask)
    }

    pub fn gateway(&self, store: &ElementStore) -> Result<u64> {
        store.get(self.ip_gateway)
    }

    pub fn set_gateway(&self, store: &mut ElementStore, gateway: u64) -> Result<()> {
        store.set(self.ip_gateway, gateway)
    }

    /// Set address, netmask and gateway from IPv4 values in one go.
    pub fn set_v4(
        &self,
        store: &mut ElementStore,
        kind: IpDataType,
        addr: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Ipv4Addr,
    ) -> Result<()> {
        self.set_ip_type(store, kind)?;
        self.set_address(store, u64::from(u32::from(addr)))?;
        self.set_netmask(store, u64::from(u32::from(netmask)))?;
        self.set_gateway(store, u64::from(u32::from(gateway)))
    }

    /// The address as IPv4, if it fits in 32 bits.
    pub fn address_v4(&self, store: &ElementStore) -> Result<Option<Ipv4Addr>> {
        Ok(u32::try_from(self.address(store)?).ok().map(Ipv4Addr::from))
    }
}

impl Component for IpData {
    type Fields = IpDataFields;

    fn register_fields(registry: &mut FieldRegistry) -> Result<IpDataFields> {
        Ok(IpDataFields {
            ip_type: registry.register(
                "airtrack.common.ipdata.ip_type",
                ElementType::Int32,
                "ipdata type enum",
            )?,
            ip_addr_block: registry.register(
                "airtrack.common.ipdata.ip_addr_block",
                ElementType::UInt64,
                "ip address",
            )?,
            ip_netmask: registry.register(
                "airtrack.common.ipdata.ip_netmask",
                ElementType::UInt64,
                "ip netmask",
            )?,
            ip_gateway: registry.register(
                "airtrack.common.ipdata.ip_gateway",
                ElementType::UInt64,
                "ip gateway",
            )?,
        })
    }

    fn attach(
        registry: &mut FieldRegistry,
        store: &mut ElementStore,
        fields: IpDataFields,
        base: ComponentBase,
    ) -> Result<Self> {
        Ok(Self {
            ip_type: base.reserve(registry, store, fields.ip_type)?,
            ip_addr_block: base.reserve(registry, store, fields.ip_addr_block)?,
            ip_netmask: base.reserve(registry, store, fields.ip_netmask)?,
            ip_gateway: base.reserve(registry, store, fields.ip_gateway)?,
            base,
        })
    }

    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_discriminants_round_trip() {
        for kind in [
            IpDataType::Unknown,
            IpDataType::Factory,
            IpDataType::Udp,
            IpDataType::Arp,
            IpDataType::Tcp,
            IpDataType::Dhcp,
        ] {
            assert_eq!(IpDataType::from_raw(kind.as_raw()), kind);
        }
        assert_eq!(IpDataType::from_raw(99), IpDataType::Unknown);
        assert_eq!(IpDataType::Dhcp.to_string(), "dhcp");
    }

    #[test]
    fn v4_addresses_stored_as_integers() {
        let mut reg = FieldRegistry::new();
        let mut store = ElementStore::new();
        let ip = IpData::create(&mut reg, &mut store).unwrap();
        ip.set_v4(
            &mut store,
            IpDataType::Dhcp,
            Ipv4Addr::new(192, 168, 1, 20),
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::new(192, 168, 1, 1),
        )
        .unwrap();

        assert_eq!(ip.ip_type(&store).unwrap(), IpDataType::Dhcp);
        assert_eq!(ip.netmask(&store).unwrap(), 0xFFFF_FF00);
        assert_eq!(
            ip.address_v4(&store).unwrap(),
            Some(Ipv4Addr::new(192, 168, 1, 20))
        );
        assert_eq!(ip.gateway(&store).unwrap(), 0xC0A8_0101);

        ip.set_address(&mut store, u64::MAX).unwrap();
        assert_eq!(ip.address_v4(&store).unwrap(), None);
    }

    #[test]
    fn ip_type_field_is_int32() {
        let mut reg = FieldRegistry::new();
        let fields = IpData::register_fields(&mut reg).unwrap();
        assert_eq!(reg.descriptor(fields.ip_type).unwrap().kind(), ElementType::Int32);
    }
}
