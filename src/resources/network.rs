//! VPC, subnets, routing and NAT for a selected topology.

use super::{get_att, name_tag, reference, select_az};
use crate::core::topology::{NatTopology, TopologyConfig};
use crate::core::types::{CfnResource, Template};
use serde_json::{json, Value};

pub const VPC: &str = "Vpc";
pub const INTERNET_GATEWAY: &str = "VpcInternetGateway";
pub const GATEWAY_ATTACHMENT: &str = "VpcGatewayAttachment";
pub const NAT_SECURITY_GROUP: &str = "NatSecurityGroup";
pub const NAT_AMI_PARAMETER: &str = "NatInstanceAmi";

/// Host bits per subnet (a /24 inside a /16).
pub const SUBNET_HOST_BITS: &str = "8";

/// `Fn::Cidr` yields at most 256 ranges, two per zone.
pub const MAX_AZS: u32 = 128;

const NAT_AMI_SSM_PATH: &str = "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2";

const NAT_USER_DATA: &str = "#!/bin/bash
yum install -y iptables-services
echo 'net.ipv4.ip_forward=1' > /etc/sysctl.d/90-nat.conf
sysctl --system
iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE
iptables -F FORWARD
service iptables save
systemctl enable --now iptables
";

/// Logical IDs later builders need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRefs {
    pub vpc: String,
    pub public_subnets: Vec<String>,
    pub private_subnets: Vec<String>,
    /// Public default routes; internet-facing resources wait on these.
    pub public_routes: Vec<String>,
}

impl NetworkRefs {
    pub fn public_subnet_refs(&self) -> Value {
        Value::Array(self.public_subnets.iter().map(|s| reference(s)).collect())
    }

    pub fn private_subnet_refs(&self) -> Value {
        Value::Array(self.private_subnets.iter().map(|s| reference(s)).collect())
    }
}

fn public_subnet(az: u32) -> String {
    format!("VpcPublicSubnet{}", az + 1)
}

fn private_subnet(az: u32) -> String {
    format!("VpcPrivateSubnet{}", az + 1)
}

fn nat_device(kind: &NatTopology, index: u32) -> String {
    match kind {
        NatTopology::Gateways { .. } => format!("VpcNatGateway{}", index + 1),
        NatTopology::Instances { .. } => format!("VpcNatInstance{}", index + 1),
    }
}

/// `index`-th range of the VPC block split into `count` subnets.
fn subnet_cidr(index: u32, count: u32) -> Value {
    json!({
        "Fn::Select": [index, { "Fn::Cidr": [get_att(VPC, "CidrBlock"), count, SUBNET_HOST_BITS] }]
    })
}

/// Declare the network for `topology`. `name` tags every resource.
pub fn add_network(t: &mut Template, topology: &TopologyConfig, name: &str) -> Result<NetworkRefs, String> {
    if topology.max_azs == 0 || topology.max_azs > MAX_AZS {
        return Err(format!(
            "{}: max_azs must be between 1 and {}, got {}",
            name, MAX_AZS, topology.max_azs
        ));
    }
    t.add(
        VPC,
        CfnResource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": topology.address_block,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": name_tag(name),
            }),
        ),
    )?;
    t.add(
        INTERNET_GATEWAY,
        CfnResource::new("AWS::EC2::InternetGateway", json!({ "Tags": name_tag(name) })),
    )?;
    t.add(
        GATEWAY_ATTACHMENT,
        CfnResource::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({
                "VpcId": reference(VPC),
                "InternetGatewayId": reference(INTERNET_GATEWAY),
            }),
        ),
    )?;

    let subnet_count = topology
        .max_azs
        .checked_mul(2)
        .ok_or_else(|| format!("{}: too many subnets", name))?;
    let mut refs = NetworkRefs {
        vpc: VPC.to_string(),
        public_subnets: Vec::new(),
        private_subnets: Vec::new(),
        public_routes: Vec::new(),
    };

    for az in 0..topology.max_azs {
        let subnet = public_subnet(az);
        let route = add_subnet(t, &subnet, az, subnet_count, true, name)?;
        t.add(
            route.clone(),
            CfnResource::new(
                "AWS::EC2::Route",
                json!({
                    "RouteTableId": reference(&format!("{}RouteTable", subnet)),
                    "DestinationCidrBlock": "0.0.0.0/0",
                    "GatewayId": reference(INTERNET_GATEWAY),
                }),
            )
            .depends_on(GATEWAY_ATTACHMENT),
        )?;
        refs.public_subnets.push(subnet);
        refs.public_routes.push(route);
    }

    add_nat_devices(t, topology, &refs, name)?;

    for az in 0..topology.max_azs {
        let subnet = private_subnet(az);
        let route = add_subnet(t, &subnet, topology.max_azs + az, subnet_count, false, name)?;
        let device = nat_device(&topology.nat, topology.nat_for_az(az));
        let target = match topology.nat {
            NatTopology::Gateways { .. } => "NatGatewayId",
            NatTopology::Instances { .. } => "InstanceId",
        };
        let mut props = json!({
            "RouteTableId": reference(&format!("{}RouteTable", subnet)),
            "DestinationCidrBlock": "0.0.0.0/0",
        });
        props[target] = reference(&device);
        t.add(route, CfnResource::new("AWS::EC2::Route", props))?;
        refs.private_subnets.push(subnet);
    }

    Ok(refs)
}

/// Subnet, route table and association. Returns the default route's ID.
fn add_subnet(
    t: &mut Template,
    subnet: &str,
    range_index: u32,
    range_count: u32,
    public: bool,
    name: &str,
) -> Result<String, String> {
    // Private subnets share the AZ index of their public twin.
    let az = if public {
        range_index
    } else {
        range_index - range_count / 2
    };
    t.add(
        subnet,
        CfnResource::new(
            "AWS::EC2::Subnet",
            json!({
                "VpcId": reference(VPC),
                "CidrBlock": subnet_cidr(range_index, range_count),
                "AvailabilityZone": select_az(az),
                "MapPublicIpOnLaunch": public,
                "Tags": name_tag(&format!("{}/{}", name, subnet)),
            }),
        ),
    )?;
    let table = format!("{}RouteTable", subnet);
    t.add(
        table.clone(),
        CfnResource::new(
            "AWS::EC2::RouteTable",
            json!({ "VpcId": reference(VPC), "Tags": name_tag(&format!("{}/{}", name, subnet)) }),
        ),
    )?;
    t.add(
        format!("{}RouteTableAssociation", subnet),
        CfnResource::new(
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({ "RouteTableId": reference(&table), "SubnetId": reference(subnet) }),
        ),
    )?;
    Ok(format!("{}DefaultRoute", subnet))
}

fn add_nat_devices(
    t: &mut Template,
    topology: &TopologyConfig,
    refs: &NetworkRefs,
    name: &str,
) -> Result<(), String> {
    match &topology.nat {
        NatTopology::Gateways { count } => {
            for k in 0..*count {
                let host = topology.subnet_for_nat(k) as usize;
                let eip = format!("VpcNatEip{}", k + 1);
                t.add(
                    eip.clone(),
                    CfnResource::new(
                        "AWS::EC2::EIP",
                        json!({ "Domain": "vpc", "Tags": name_tag(name) }),
                    ),
                )?;
                t.add(
                    nat_device(&topology.nat, k),
                    CfnResource::new(
                        "AWS::EC2::NatGateway",
                        json!({
                            "SubnetId": reference(&refs.public_subnets[host]),
                            "AllocationId": get_att(&eip, "AllocationId"),
                            "Tags": name_tag(name),
                        }),
                    )
                    .depends_on(&refs.public_routes[host]),
                )?;
            }
        }
        NatTopology::Instances {
            count,
            instance_type,
        } => {
            t.parameters.insert(
                NAT_AMI_PARAMETER.to_string(),
                json!({
                    "Type": "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>",
                    "Default": NAT_AMI_SSM_PATH,
                }),
            );
            t.add(
                NAT_SECURITY_GROUP,
                CfnResource::new(
                    "AWS::EC2::SecurityGroup",
                    json!({
                        "GroupDescription": "NAT instances: forward traffic from the VPC",
                        "VpcId": reference(VPC),
                        "SecurityGroupIngress": [{
                            "IpProtocol": "-1",
                            "CidrIp": get_att(VPC, "CidrBlock"),
                        }],
                        "SecurityGroupEgress": [{ "IpProtocol": "-1", "CidrIp": "0.0.0.0/0" }],
                        "Tags": name_tag(name),
                    }),
                ),
            )?;
            for k in 0..*count {
                let host = topology.subnet_for_nat(k) as usize;
                t.add(
                    nat_device(&topology.nat, k),
                    CfnResource::new(
                        "AWS::EC2::Instance",
                        json!({
                            "ImageId": reference(NAT_AMI_PARAMETER),
                            "InstanceType": instance_type,
                            "SubnetId": reference(&refs.public_subnets[host]),
                            "SourceDestCheck": false,
                            "SecurityGroupIds": [get_att(NAT_SECURITY_GROUP, "GroupId")],
                            "UserData": { "Fn::Base64": NAT_USER_DATA },
                            "Tags": name_tag(&format!("{}/NatInstance{}", name, k + 1)),
                        }),
                    )
                    .depends_on(&refs.public_routes[host]),
                )?;
            }
        }
    }
    Ok(())
}
