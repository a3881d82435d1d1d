//! Stage topology selector: the single cost/availability branch point.
//!
//! Production gets one managed NAT gateway per availability zone. Every other
//! stage gets exactly two small NAT instances, however many zones it spans.

use super::types::StageContext;

/// NAT instance class used outside production.
pub const NAT_INSTANCE_TYPE: &str = "t3.micro";

/// Number of NAT instances used outside production.
pub const NAT_INSTANCE_COUNT: u32 = 2;

/// How private subnets reach the internet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatTopology {
    /// Managed NAT gateways, one per availability zone.
    Gateways { count: u32 },
    /// Self-managed NAT instances of a fixed class.
    Instances { count: u32, instance_type: String },
}

impl NatTopology {
    pub fn count(&self) -> u32 {
        match self {
            Self::Gateways { count } | Self::Instances { count, .. } => *count,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Gateways { count } => format!("{} NAT gateway(s)", count),
            Self::Instances {
                count,
                instance_type,
            } => format!("{} NAT instance(s) ({})", count, instance_type),
        }
    }
}

/// Network topology for one pipeline stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    pub address_block: String,
    pub max_azs: u32,
    pub nat: NatTopology,
}

impl TopologyConfig {
    /// Index of the NAT device serving private subnet `az`.
    pub fn nat_for_az(&self, az: u32) -> u32 {
        match self.nat.count() {
            0 => 0,
            n => az % n,
        }
    }

    /// Public subnet index hosting NAT device `nat`.
    pub fn subnet_for_nat(&self, nat: u32) -> u32 {
        match self.max_azs {
            0 => 0,
            n => nat % n,
        }
    }
}

/// Choose the network topology for a stage. CIDR and zone count pass through
/// unvalidated; the provisioning engine rejects bad values.
pub fn select_topology(ctx: &StageContext) -> TopologyConfig {
    let nat = if ctx.is_production {
        NatTopology::Gateways { count: ctx.max_azs }
    } else {
        NatTopology::Instances {
            count: NAT_INSTANCE_COUNT,
            instance_type: NAT_INSTANCE_TYPE.to_string(),
        }
    };
    TopologyConfig {
        address_block: ctx.address_block.clone(),
        max_azs: ctx.max_azs,
        nat,
    }
}
