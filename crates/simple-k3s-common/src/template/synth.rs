//! Descriptor graph to CloudFormation rendering

use super::intrinsics::{base64, get_att, join, logical_id, reference, select_az, tag};
use super::{Output, Parameter, Resource, Template};
use crate::bootstrap::{CloudFormationInit, InitOptions};
use crate::error::Result;
use crate::instance::InstanceDescriptor;
use crate::network::{NetworkSpec, SubnetAllocation, SubnetVisibility};
use crate::security::{IngressRule, SecurityPolicy};
use crate::stack::{DescriptorGraph, OutputValue};
use serde_json::{Value, json};
use tracing::debug;

const IMAGE_PARAMETER_TYPE: &str = "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>";
const ANY_IPV4: &str = "0.0.0.0/0";

/// Logical ids of the network resources other resources point at
struct NetworkIds {
    vpc: String,
    public_subnets: Vec<PublicSubnetIds>,
}

struct PublicSubnetIds {
    subnet: String,
    az_index: u32,
    association: String,
    default_route: String,
}

/// Render `graph` as a CloudFormation template.
///
/// The output is a pure function of the graph. References are checked
/// before returning, so a template that comes out of here never points at
/// an undefined logical id.
pub fn synthesize(graph: &DescriptorGraph) -> Result<Template> {
    let stack = graph.stack_name();
    let mut template = Template::new(format!("Single-instance k3s cluster ({stack})"));

    let network = add_network(&mut template, stack, graph.network())?;
    let security_group = add_security_group(&mut template, stack, &network, graph.security_policy())?;
    let instance = add_instance(&mut template, stack, &network, &security_group, graph.instance())?;

    for output in graph.outputs() {
        let value = match output.value {
            OutputValue::InstancePublicIp => get_att(&instance, "PublicIp"),
            OutputValue::InstancePublicDnsName => get_att(&instance, "PublicDnsName"),
            OutputValue::InstanceId => reference(&instance),
        };
        template.add_output(
            output.name.clone(),
            Output {
                description: output.description.clone(),
                value,
            },
        )?;
    }

    template.validate_references()?;
    debug!(
        resources = template.resources.len(),
        outputs = template.outputs.len(),
        "Synthesized template"
    );
    Ok(template)
}

fn name_tags(stack: &str, path: &[&str]) -> Value {
    let mut name = stack.to_string();
    for part in path {
        name.push('/');
        name.push_str(part);
    }
    json!([tag("Name", name)])
}

fn add_network(template: &mut Template, stack: &str, network: &NetworkSpec) -> Result<NetworkIds> {
    let vpc = network.name().to_string();
    let igw = logical_id(&[&vpc, "IGW"]);
    let attachment = logical_id(&[&vpc, "VPCGW"]);

    template.add_resource(
        vpc.clone(),
        Resource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": network.cidr_block().to_string(),
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": name_tags(stack, &[&vpc]),
            }),
        ),
    )?;

    let has_public = network.has_public_subnets();
    if has_public {
        template.add_resource(
            igw.clone(),
            Resource::new(
                "AWS::EC2::InternetGateway",
                json!({ "Tags": name_tags(stack, &[&vpc]) }),
            ),
        )?;
        template.add_resource(
            attachment.clone(),
            Resource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({
                    "VpcId": reference(&vpc),
                    "InternetGatewayId": reference(&igw),
                }),
            ),
        )?;
    }

    let mut public_subnets = Vec::new();
    for allocation in network.allocations() {
        let ids = add_subnet(template, stack, &vpc, allocation, &igw, &attachment)?;
        if let Some(ids) = ids {
            public_subnets.push(ids);
        }
    }
    debug!(
        vpc = %vpc,
        subnets = network.allocations().len(),
        public = public_subnets.len(),
        "Rendered network"
    );

    Ok(NetworkIds {
        vpc,
        public_subnets,
    })
}

/// One subnet plus its route table; public subnets also get a default route
fn add_subnet(
    template: &mut Template,
    stack: &str,
    vpc: &str,
    allocation: &SubnetAllocation,
    igw: &str,
    attachment: &str,
) -> Result<Option<PublicSubnetIds>> {
    let subnet_name = format!("{}Subnet{}", allocation.name, allocation.az_index + 1);
    let subnet = logical_id(&[vpc, &subnet_name]);
    let route_table = logical_id(&[&subnet, "RouteTable"]);
    let association = logical_id(&[&subnet, "RouteTableAssociation"]);
    let public = allocation.visibility == SubnetVisibility::Public;

    template.add_resource(
        subnet.clone(),
        Resource::new(
            "AWS::EC2::Subnet",
            json!({
                "VpcId": reference(vpc),
                "CidrBlock": allocation.cidr.to_string(),
                "AvailabilityZone": select_az(allocation.az_index),
                "MapPublicIpOnLaunch": public,
                "Tags": name_tags(stack, &[vpc, &subnet_name]),
            }),
        ),
    )?;
    template.add_resource(
        route_table.clone(),
        Resource::new(
            "AWS::EC2::RouteTable",
            json!({
                "VpcId": reference(vpc),
                "Tags": name_tags(stack, &[vpc, &subnet_name]),
            }),
        ),
    )?;
    template.add_resource(
        association.clone(),
        Resource::new(
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({
                "RouteTableId": reference(&route_table),
                "SubnetId": reference(&subnet),
            }),
        ),
    )?;

    if !public {
        return Ok(None);
    }

    let default_route = logical_id(&[&subnet, "DefaultRoute"]);
    template.add_resource(
        default_route.clone(),
        Resource::new(
            "AWS::EC2::Route",
            json!({
                "RouteTableId": reference(&route_table),
                "DestinationCidrBlock": ANY_IPV4,
                "GatewayId": reference(igw),
            }),
        )
        .depends_on([attachment]),
    )?;

    Ok(Some(PublicSubnetIds {
        subnet,
        az_index: allocation.az_index,
        association,
        default_route,
    }))
}

fn ingress_properties(rule: &IngressRule) -> Value {
    json!({
        "IpProtocol": rule.port.protocol.as_str(),
        "CidrIp": rule.peer.cidr().to_string(),
        "Description": rule.label,
        "FromPort": rule.port.number,
        "ToPort": rule.port.number,
    })
}

fn add_security_group(
    template: &mut Template,
    stack: &str,
    network: &NetworkIds,
    policy: &SecurityPolicy,
) -> Result<String> {
    let id = policy.name().to_string();

    let egress = if policy.allow_all_outbound() {
        json!([{
            "CidrIp": ANY_IPV4,
            "Description": "Allow all outbound traffic by default",
            "IpProtocol": "-1",
        }])
    } else {
        // an egress rule nothing can match, which replaces the implicit allow-all
        json!([{
            "CidrIp": "255.255.255.255/32",
            "Description": "Disallow all traffic",
            "FromPort": 252,
            "IpProtocol": "icmp",
            "ToPort": 86,
        }])
    };

    let mut properties = json!({
        "GroupDescription": policy.description(),
        "SecurityGroupEgress": egress,
        "VpcId": reference(&network.vpc),
        "Tags": name_tags(stack, &[&id]),
    });

    if policy.disable_inline_rules() {
        for (index, rule) in policy.ingress_rules().iter().enumerate() {
            let mut ingress = ingress_properties(rule);
            ingress["GroupId"] = get_att(&id, "GroupId");
            template.add_resource(
                logical_id(&[&id, &format!("Ingress{}", index + 1)]),
                Resource::new("AWS::EC2::SecurityGroupIngress", ingress),
            )?;
        }
    } else if !policy.ingress_rules().is_empty() {
        properties["SecurityGroupIngress"] =
            policy.ingress_rules().iter().map(ingress_properties).collect();
    }

    template.add_resource(id.clone(), Resource::new("AWS::EC2::SecurityGroup", properties))?;
    debug!(
        security_group = %id,
        rules = policy.ingress_rules().len(),
        inline = !policy.disable_inline_rules(),
        "Rendered security group"
    );
    Ok(id)
}

/// Script run by cloud-init: the plain commands, then cfn-init and the signal
fn user_data(instance: &InstanceDescriptor, id: &str) -> Value {
    let script = instance.user_data().render();
    let Some(options) = instance.init_options().filter(|_| instance.init().is_some()) else {
        return base64(json!(script));
    };

    let config_sets = options.config_sets.join(",");
    base64(join(vec![
        json!(format!(
            "{script}\n(\n  set +e\n  /opt/aws/bin/cfn-init -v --region "
        )),
        reference("AWS::Region"),
        json!(" --stack "),
        reference("AWS::StackName"),
        json!(format!(" --resource {id} -c {config_sets}\n  /opt/aws/bin/cfn-signal -e $? --region ")),
        reference("AWS::Region"),
        json!(" --stack "),
        reference("AWS::StackName"),
        json!(format!(" --resource {id}\n  cat /var/log/cfn-init.log >&2\n)")),
    ]))
}

fn creation_policy(options: &InitOptions) -> Value {
    json!({ "ResourceSignal": { "Count": 1, "Timeout": options.iso_timeout() } })
}

fn add_role(
    template: &mut Template,
    stack: &str,
    instance: &str,
    init: Option<&CloudFormationInit>,
) -> Result<(String, Vec<String>)> {
    let role = logical_id(&[instance, "InstanceRole"]);
    let profile = logical_id(&[instance, "InstanceProfile"]);

    template.add_resource(
        role.clone(),
        Resource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": {
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": { "Service": "ec2.amazonaws.com" },
                    }],
                    "Version": "2012-10-17",
                },
                "Tags": name_tags(stack, &[instance]),
            }),
        ),
    )?;
    template.add_resource(
        profile.clone(),
        Resource::new("AWS::IAM::InstanceProfile", json!({ "Roles": [reference(&role)] })),
    )?;

    let mut depends_on = Vec::new();
    if init.is_some() {
        let policy = logical_id(&[&role, "DefaultPolicy"]);
        template.add_resource(
            policy.clone(),
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyDocument": {
                        "Statement": [{
                            "Action": [
                                "cloudformation:DescribeStackResource",
                                "cloudformation:SignalResource",
                            ],
                            "Effect": "Allow",
                            "Resource": reference("AWS::StackId"),
                        }],
                        "Version": "2012-10-17",
                    },
                    "PolicyName": policy,
                    "Roles": [reference(&role)],
                }),
            ),
        )?;
        depends_on.push(policy);
    }
    depends_on.push(role);
    Ok((profile, depends_on))
}

fn add_instance(
    template: &mut Template,
    stack: &str,
    network: &NetworkIds,
    security_group: &str,
    instance: &InstanceDescriptor,
) -> Result<String> {
    let id = instance.name().to_string();

    let ssm_parameter = instance.image().ssm_parameter();
    let image_parameter = logical_id(&["SsmParameterValue", &ssm_parameter, "Parameter"]);
    template.add_parameter(
        image_parameter.clone(),
        Parameter {
            parameter_type: IMAGE_PARAMETER_TYPE.to_string(),
            default: Some(ssm_parameter),
            description: None,
        },
    )?;

    let (profile, mut depends_on) = add_role(template, stack, &id, instance.init())?;

    let block_devices: Vec<Value> = instance
        .volumes()
        .iter()
        .map(|volume| {
            let mut ebs = json!({ "VolumeSize": volume.size_gib });
            if let Some(volume_type) = volume.volume_type {
                ebs["VolumeType"] = json!(volume_type.as_str());
            }
            json!({ "DeviceName": volume.device_name, "Ebs": ebs })
        })
        .collect();

    let mut properties = json!({
        "IamInstanceProfile": reference(&profile),
        "ImageId": reference(&image_parameter),
        "InstanceType": instance.instance_type().to_string(),
        "SecurityGroupIds": [get_att(security_group, "GroupId")],
        "Tags": name_tags(stack, &[&id]),
        "UserData": user_data(instance, &id),
    });
    if !block_devices.is_empty() {
        properties["BlockDeviceMappings"] = Value::Array(block_devices);
    }

    // the assembler guarantees a public subnet; place the instance in the first one
    if let Some(subnet) = network.public_subnets.first() {
        properties["SubnetId"] = reference(&subnet.subnet);
        properties["AvailabilityZone"] = select_az(subnet.az_index);
        depends_on.extend([subnet.default_route.clone(), subnet.association.clone()]);
    }

    let mut resource = Resource::new("AWS::EC2::Instance", properties).depends_on(depends_on);
    if let (Some(init), Some(options)) = (instance.init(), instance.init_options()) {
        resource = resource
            .metadata(json!({ "AWS::CloudFormation::Init": init.to_metadata() }))
            .creation_policy(creation_policy(options));
    }
    template.add_resource(id.clone(), resource)?;
    debug!(instance = %id, instance_type = %instance.instance_type(), "Rendered instance");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentConfig;
    use crate::security::{Peer, Port, Protocol};
    use crate::stack::build_graph;
    use crate::volume::{EbsVolumeType, VolumeSpec};

    fn stock_template() -> Template {
        synthesize(&build_graph(&DeploymentConfig::default()).unwrap()).unwrap()
    }

    #[test]
    fn test_stock_resource_counts() {
        let template = stock_template();
        let count = |t: &str| template.resources_of_type(t).count();
        assert_eq!(count("AWS::EC2::VPC"), 1);
        assert_eq!(count("AWS::EC2::InternetGateway"), 1);
        assert_eq!(count("AWS::EC2::VPCGatewayAttachment"), 1);
        assert_eq!(count("AWS::EC2::Subnet"), 3);
        assert_eq!(count("AWS::EC2::RouteTable"), 3);
        assert_eq!(count("AWS::EC2::SubnetRouteTableAssociation"), 3);
        assert_eq!(count("AWS::EC2::Route"), 3);
        assert_eq!(count("AWS::EC2::SecurityGroup"), 1);
        assert_eq!(count("AWS::EC2::SecurityGroupIngress"), 4);
        assert_eq!(count("AWS::IAM::Role"), 1);
        assert_eq!(count("AWS::IAM::Policy"), 1);
        assert_eq!(count("AWS::IAM::InstanceProfile"), 1);
        assert_eq!(count("AWS::EC2::Instance"), 1);
    }

    #[test]
    fn test_subnets() {
        let template = stock_template();
        let cidrs: Vec<&str> = template
            .resources_of_type("AWS::EC2::Subnet")
            .map(|id| template.resources[id].properties["CidrBlock"].as_str().unwrap())
            .collect();
        assert_eq!(cidrs, ["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"]);

        let subnet = &template.resources["eksVpcPublicSubnet2"];
        assert_eq!(subnet.properties["MapPublicIpOnLaunch"], true);
        assert_eq!(subnet.properties["AvailabilityZone"], select_az(1));
        assert_eq!(
            template.resources["eksVpcPublicSubnet2DefaultRoute"].depends_on,
            ["eksVpcVPCGW"]
        );
    }

    #[test]
    fn test_ingress_resources() {
        let template = stock_template();
        let mut ports: Vec<(u64, &str, &str)> = template
            .resources_of_type("AWS::EC2::SecurityGroupIngress")
            .map(|id| {
                let p = &template.resources[id].properties;
                assert_eq!(p["GroupId"], get_att("eksSecurityGroup", "GroupId"));
                (
                    p["FromPort"].as_u64().unwrap(),
                    p["IpProtocol"].as_str().unwrap(),
                    p["CidrIp"].as_str().unwrap(),
                )
            })
            .collect();
        ports.sort();
        assert_eq!(
            ports,
            [
                (22, "tcp", "0.0.0.0/0"),
                (80, "tcp", "0.0.0.0/0"),
                (5000, "tcp", "0.0.0.0/0"),
                (30007, "tcp", "0.0.0.0/0"),
            ]
        );
        let sg = &template.resources["eksSecurityGroup"];
        assert!(sg.properties.get("SecurityGroupIngress").is_none());
        assert_eq!(sg.properties["GroupDescription"], "EKS Security Groups");
        assert_eq!(sg.properties["SecurityGroupEgress"][0]["IpProtocol"], "-1");
    }

    #[test]
    fn test_instance_properties() {
        let template = stock_template();
        let instance = &template.resources["eksInstance"];
        let p = &instance.properties;
        assert_eq!(p["InstanceType"], "t3.small");
        assert_eq!(
            p["BlockDeviceMappings"],
            json!([{ "DeviceName": "/dev/xvda", "Ebs": { "VolumeSize": 50 } }])
        );
        assert_eq!(p["SubnetId"], reference("eksVpcPublicSubnet1"));
        assert_eq!(p["SecurityGroupIds"], json!([get_att("eksSecurityGroup", "GroupId")]));

        let parameter = p["ImageId"]["Ref"].as_str().unwrap();
        assert_eq!(template.parameters[parameter].parameter_type, IMAGE_PARAMETER_TYPE);
        assert_eq!(
            template.parameters[parameter].default.as_deref(),
            Some("/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2")
        );

        assert_eq!(
            instance.creation_policy,
            Some(json!({ "ResourceSignal": { "Count": 1, "Timeout": "PT1H" } }))
        );
        assert!(instance.depends_on.contains(&"eksInstanceInstanceRole".to_string()));
        assert!(instance.depends_on.contains(&"eksVpcPublicSubnet1DefaultRoute".to_string()));

        let init = &instance.metadata.as_ref().unwrap()["AWS::CloudFormation::Init"];
        assert_eq!(init["configSets"]["default"], json!(["yumPreinstall", "config"]));
        assert_eq!(
            init["config"]["commands"]["000"]["command"],
            "curl -sfL https://get.k3s.io | sh -"
        );
        assert_eq!(init["yumPreinstall"]["packages"]["yum"]["nginx"], json!([]));
    }

    #[test]
    fn test_user_data_script() {
        let template = stock_template();
        let parts = template.resources["eksInstance"].properties["UserData"]["Fn::Base64"]["Fn::Join"][1]
            .as_array()
            .unwrap()
            .clone();
        let head = parts[0].as_str().unwrap();
        assert!(head.starts_with(
            "#!/bin/bash\n/opt/aws/bin/cfn-init -s WebTest --region us-east-1 -r NewServer\n"
        ));
        assert_eq!(parts[1], reference("AWS::Region"));
        assert!(parts[4].as_str().unwrap().starts_with(" --resource eksInstance -c default\n"));
        assert!(parts[4].as_str().unwrap().contains("cfn-signal -e $?"));
    }

    #[test]
    fn test_output() {
        let template = stock_template();
        assert_eq!(
            template.outputs["EC2PublicAddress"].value,
            get_att("eksInstance", "PublicIp")
        );
    }

    #[test]
    fn test_references_and_order() {
        let template = stock_template();
        assert!(template.validate_references().is_ok());
        let order = template.creation_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("eksVpc") < pos("eksSecurityGroup"));
        assert!(pos("eksSecurityGroup") < pos("eksInstance"));
        assert!(pos("eksVpcVPCGW") < pos("eksVpcPublicSubnet1DefaultRoute"));
        assert!(pos("eksInstanceInstanceRoleDefaultPolicy") < pos("eksInstance"));
        assert_eq!(order.len(), template.resources.len());
    }

    #[test]
    fn test_deterministic_json() {
        let config = DeploymentConfig::default();
        let a = synthesize(&build_graph(&config).unwrap()).unwrap().to_json_pretty().unwrap();
        let b = synthesize(&build_graph(&config).unwrap()).unwrap().to_json_pretty().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_inline_rules_and_closed_egress() {
        let graph = build_graph(&DeploymentConfig::default()).unwrap();
        let network = graph.network().clone();
        let policy = std::sync::Arc::new(
            SecurityPolicy::builder("sg", network.clone())
                .allow_all_outbound(false)
                .add_ingress_rule(Peer::AnyIpv4, Port::tcp(22), "Allow SSH")
                .add_ingress_rule(Peer::AnyIpv4, Port::tcp(22), "Allow SSH")
                .build()
                .unwrap(),
        );
        let instance = InstanceDescriptor::builder("box", network, policy)
            .image(*graph.instance().image())
            .instance_type(graph.instance().instance_type())
            .volume(VolumeSpec::ebs("/dev/xvda", 50).unwrap().with_volume_type(EbsVolumeType::Gp3))
            .build()
            .unwrap();
        let graph = crate::stack::assemble("s", instance, []).unwrap();
        let template = synthesize(&graph).unwrap();

        let sg = &template.resources["sg"];
        let inline = sg.properties["SecurityGroupIngress"].as_array().unwrap();
        assert_eq!(inline.len(), 2);
        assert_eq!(inline[0]["IpProtocol"], Protocol::Tcp.as_str());
        assert_eq!(template.resources_of_type("AWS::EC2::SecurityGroupIngress").count(), 0);
        assert_eq!(sg.properties["SecurityGroupEgress"][0]["CidrIp"], "255.255.255.255/32");

        // no init metadata: plain user data, no signal, no signal policy
        let instance = &template.resources["box"];
        assert!(instance.creation_policy.is_none());
        assert!(instance.metadata.is_none());
        assert_eq!(
            instance.properties["UserData"],
            base64(json!("#!/bin/bash"))
        );
        assert_eq!(template.resources_of_type("AWS::IAM::Policy").count(), 0);
        assert_eq!(
            instance.properties["BlockDeviceMappings"][0]["Ebs"]["VolumeType"],
            "gp3"
        );
        assert!(template.outputs.is_empty());
    }

    #[test]
    fn test_duplicate_rules_get_distinct_resources() {
        let mut config = DeploymentConfig::default();
        let first = config.ingress[0].clone();
        config.ingress.push(first);
        let template = synthesize(&build_graph(&config).unwrap()).unwrap();
        assert_eq!(template.resources_of_type("AWS::EC2::SecurityGroupIngress").count(), 5);
        assert!(template.resources.contains_key("eksSecurityGroupIngress1"));
        assert!(template.resources.contains_key("eksSecurityGroupIngress5"));
    }

    #[test]
    fn test_colliding_logical_ids_fail() {
        let graph = build_graph(&DeploymentConfig::default()).unwrap();
        let network = graph.network().clone();
        let policy = std::sync::Arc::new(
            SecurityPolicy::builder(network.name(), network.clone())
                .build()
                .unwrap(),
        );
        let instance = InstanceDescriptor::builder("box", network, policy)
            .image(*graph.instance().image())
            .instance_type(graph.instance().instance_type())
            .build()
            .unwrap();
        let graph = crate::stack::assemble("s", instance, []).unwrap();
        assert_eq!(
            synthesize(&graph),
            Err(crate::error::DescriptorError::DuplicateLogicalId("eksVpc".into()))
        );
    }
}
