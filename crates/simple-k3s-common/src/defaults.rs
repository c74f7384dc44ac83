//! Default deployment values
//!
//! These constants describe the stock single-instance k3s stack. Every one of
//! them can be overridden through a `DeploymentConfig` file.

use std::time::Duration;

/// CloudFormation stack name
pub const DEFAULT_STACK_NAME: &str = "SimpleK3SEc2Stack";

/// Region the stack is deployed to
pub const DEFAULT_REGION: &str = "us-east-1";

/// VPC address range
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/21";

/// Number of availability zones the VPC spans
pub const DEFAULT_MAX_AZS: u32 = 3;

/// Name of the single public subnet layout
pub const DEFAULT_SUBNET_NAME: &str = "public";

/// Prefix length of each public subnet
pub const DEFAULT_SUBNET_MASK: u8 = 24;

/// Security group description
pub const DEFAULT_SECURITY_GROUP_DESCRIPTION: &str = "EKS Security Groups";

/// Ingress ports opened to 0.0.0.0/0 over TCP, with their labels
pub const DEFAULT_INGRESS: &[(u16, &str)] = &[
    (22, "Allow SSH"),
    (80, "Allow HTTP"),
    (5000, "Allow Application"),
    (30007, "Allow Custom Application"),
];

/// Instance type
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.small";

/// Root device name
pub const DEFAULT_ROOT_DEVICE: &str = "/dev/xvda";

/// Root volume size in GiB
pub const DEFAULT_ROOT_VOLUME_SIZE_GIB: u32 = 50;

/// How long the engine waits for the instance's cfn-init success signal
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// How long `deploy` polls a stack before giving up, in seconds.
/// Covers the init signal timeout plus network and instance creation.
pub const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 90 * 60;

/// How long `destroy` polls a stack before giving up, in seconds
pub const DEFAULT_DESTROY_TIMEOUT_SECS: u64 = 30 * 60;

/// Plain user-data commands run before cfn-init
pub const DEFAULT_USER_DATA_COMMANDS: &[&str] =
    &["/opt/aws/bin/cfn-init -s WebTest --region us-east-1 -r NewServer"];

/// Packages installed by the `yumPreinstall` init config
pub const DEFAULT_YUM_PACKAGES: &[&str] = &["curl", "nginx"];

/// Shell commands run by the `config` init config, in order
pub const DEFAULT_INIT_COMMANDS: &[&str] = &[
    "curl -sfL https://get.k3s.io | sh -",
    "k3s kubectl apply -f https://k8s.io/examples/controllers/nginx-deployment.yaml",
    "k3s kubectl apply -f https://gist.githubusercontent.com/berviantoleo/a03c2dcb3150764124a8c050124db136/raw/2de35a3880888fbbde5bec3360a2b1dc4770fbb9/nginx-service.yaml",
];

/// Services enabled by the `config` init config
pub const DEFAULT_INIT_SERVICES: &[&str] = &["nginx"];

/// Name of the stack output carrying the instance public IP
pub const PUBLIC_ADDRESS_OUTPUT: &str = "EC2PublicAddress";

// Serde default functions for struct field defaults

pub fn default_stack_name() -> String {
    DEFAULT_STACK_NAME.to_string()
}

pub fn default_vpc_cidr() -> String {
    DEFAULT_VPC_CIDR.to_string()
}

pub fn default_max_azs() -> u32 {
    DEFAULT_MAX_AZS
}

pub fn default_subnet_mask() -> u8 {
    DEFAULT_SUBNET_MASK
}

pub fn default_instance_type() -> String {
    DEFAULT_INSTANCE_TYPE.to_string()
}

pub fn default_root_device() -> String {
    DEFAULT_ROOT_DEVICE.to_string()
}

pub fn default_root_volume_size_gib() -> u32 {
    DEFAULT_ROOT_VOLUME_SIZE_GIB
}

pub fn default_init_timeout_secs() -> u64 {
    DEFAULT_INIT_TIMEOUT.as_secs()
}

pub fn default_user_data_commands() -> Vec<String> {
    DEFAULT_USER_DATA_COMMANDS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_init_commands() -> Vec<String> {
    DEFAULT_INIT_COMMANDS.iter().map(|s| s.to_string()).collect()
}

pub fn default_yum_packages() -> Vec<String> {
    DEFAULT_YUM_PACKAGES.iter().map(|s| s.to_string()).collect()
}

pub fn default_init_services() -> Vec<String> {
    DEFAULT_INIT_SERVICES.iter().map(|s| s.to_string()).collect()
}
