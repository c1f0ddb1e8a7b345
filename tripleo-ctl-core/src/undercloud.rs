//! Undercloud install/upgrade: settings, preflight checks and the deploy
//! command line.
//!
//! Two paths exist. The legacy path hands off to the instack scripts. The heat
//! path writes a `parameter_defaults` environment file and runs the standalone
//! deploy command with environment files chosen from the settings.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::contract::CommandRunner;
use crate::error::UndercloudError;
use crate::process::Invocation;

pub const PARAMETERS_FILE: &str = "undercloud_parameters.yaml";
pub const LOG_FILE: &str = "install-undercloud.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    Install,
    Upgrade,
}

/// Undercloud settings as read from the YAML config. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndercloudConfig {
    pub local_ip: String,
    pub undercloud_public_host: String,
    pub undercloud_admin_host: String,
    pub local_domain: String,
    pub templates: String,
    pub roles_file: Option<String>,
    pub output_dir: PathBuf,
    pub container_images_file: Option<String>,
    pub masquerade_networks: Vec<String>,
    pub enable_ironic: bool,
    pub enable_ironic_inspector: bool,
    pub enable_mistral: bool,
    pub enable_zaqar: bool,
    pub enable_ui: bool,
    pub enable_tempest: bool,
    pub enable_swift_encryption: bool,
    pub generate_service_certificate: bool,
    pub undercloud_nameservers: Vec<String>,
    pub local_interface: String,
    pub local_mtu: u32,
    /// Template for `UndercloudNetConfigOverride`, see [`render_net_config`].
    pub net_config_override: Option<PathBuf>,
}

impl Default for UndercloudConfig {
    fn default() -> Self {
        UndercloudConfig {
            local_ip: "192.168.24.1/24".to_owned(),
            undercloud_public_host: "192.168.24.2".to_owned(),
            undercloud_admin_host: "192.168.24.3".to_owned(),
            local_domain: "localdomain".to_owned(),
            templates: "/usr/share/openstack-tripleo-heat-templates/".to_owned(),
            roles_file: None,
            output_dir: std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            container_images_file: None,
            masquerade_networks: Vec::new(),
            enable_ironic: true,
            enable_ironic_inspector: true,
            enable_mistral: true,
            enable_zaqar: true,
            enable_ui: true,
            enable_tempest: true,
            enable_swift_encryption: false,
            generate_service_certificate: true,
            undercloud_nameservers: Vec::new(),
            local_interface: "eth1".to_owned(),
            local_mtu: 1500,
            net_config_override: None,
        }
    }
}

impl UndercloudConfig {
    /// Preflight checks run before anything is written or executed.
    pub fn validate(&self) -> Result<(), UndercloudError> {
        parse_cidr(&self.local_ip).ok_or_else(|| {
            UndercloudError::Configuration(format!(
                "local_ip \"{}\" is not a valid CIDR address",
                self.local_ip
            ))
        })?;
        if self.undercloud_public_host.trim().is_empty() || self.undercloud_admin_host.trim().is_empty() {
            return Err(UndercloudError::Configuration(
                "undercloud_public_host and undercloud_admin_host must be set".to_owned(),
            ));
        }
        if self.undercloud_public_host == self.undercloud_admin_host {
            return Err(UndercloudError::Configuration(format!(
                "undercloud_public_host and undercloud_admin_host must differ, both are {}",
                self.undercloud_public_host
            )));
        }
        if let Some(bad) = self
            .undercloud_nameservers
            .iter()
            .find(|ns| ns.parse::<IpAddr>().is_err())
        {
            return Err(UndercloudError::Configuration(format!(
                "nameserver \"{bad}\" is not an IP address"
            )));
        }
        if let Some(bad) = self.masquerade_networks.iter().find(|n| parse_cidr(n).is_none()) {
            return Err(UndercloudError::Configuration(format!(
                "masquerade network \"{bad}\" is not a valid CIDR"
            )));
        }
        if let Some(template) = self.net_config_override.as_ref().filter(|t| !t.is_file()) {
            return Err(UndercloudError::Configuration(format!(
                "net_config_override \"{}\" does not exist",
                template.display()
            )));
        }
        Ok(())
    }

    pub fn parameters_path(&self) -> PathBuf {
        self.output_dir.join(PARAMETERS_FILE)
    }

    /// Content of the generated `parameter_defaults` environment file.
    pub fn parameter_defaults(&self) -> Result<serde_json::Value, UndercloudError> {
        let mut params = serde_json::Map::new();
        params.insert("NeutronPublicInterface".into(), json!(self.local_interface));
        params.insert("UndercloudLocalMtu".into(), json!(self.local_mtu));
        if !self.undercloud_nameservers.is_empty() {
            params.insert("DnsServers".into(), json!(self.undercloud_nameservers.join(",")));
        }
        if !self.masquerade_networks.is_empty() {
            let source = cidr_network(&self.local_ip).unwrap_or_else(|| self.local_ip.clone());
            let mut masquerade = serde_json::Map::new();
            masquerade.insert(source, json!(self.masquerade_networks));
            params.insert("MasqueradeNetworks".into(), masquerade.into());
        }
        if let Some(template) = &self.net_config_override {
            params.insert("UndercloudNetConfigOverride".into(), render_net_config(self, template)?);
        }
        Ok(json!({ "parameter_defaults": params }))
    }

    pub fn trace_loaded(&self) {
        info!(
            local_ip = %self.local_ip,
            public_host = %self.undercloud_public_host,
            admin_host = %self.undercloud_admin_host,
            output_dir = %self.output_dir.display(),
            "Loaded undercloud config"
        );
        debug!(?self, "Undercloud config loaded (full debug)");
    }
}

/// Renders a network config template into the `UndercloudNetConfigOverride`
/// document.
///
/// `{{NAME}}` placeholders are replaced textually; list values are inserted
/// as JSON. The template may leave out the outer braces.
pub fn render_net_config(config: &UndercloudConfig, template: &Path) -> Result<serde_json::Value, UndercloudError> {
    let raw = fs::read_to_string(template).map_err(|source| UndercloudError::Read {
        path: template.to_path_buf(),
        source,
    })?;
    let substitutions = [
        ("LOCAL_INTERFACE", config.local_interface.clone()),
        ("LOCAL_MTU", config.local_mtu.to_string()),
        ("UNDERCLOUD_NAMESERVERS", json!(config.undercloud_nameservers).to_string()),
        ("PUBLIC_INTERFACE_IP", config.undercloud_public_host.clone()),
        ("LOCAL_IP", config.local_ip.clone()),
        ("SUBNETS_STATIC_ROUTES", "[]".to_owned()),
    ];
    let rendered = substitutions
        .iter()
        .fold(raw, |text, (name, value)| text.replace(&format!("{{{{{name}}}}}"), value));
    let rendered = rendered.trim();
    let document = if rendered.starts_with('{') {
        rendered.to_owned()
    } else {
        format!("{{{rendered}}}")
    };
    debug!(template = %template.display(), "Rendered network config override");
    serde_json::from_str(&document).map_err(|e| {
        UndercloudError::Configuration(format!(
            "net_config_override \"{}\" is not valid JSON once rendered: {e}",
            template.display()
        ))
    })
}

/// Options taken from the command line rather than the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    pub use_heat: bool,
    pub validations: bool,
    pub debug: bool,
    /// Directory the deploy log is written to.
    pub cwd: PathBuf,
}

fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((addr, prefix))
}

/// `192.168.24.1/24` -> `192.168.24.0/24`
fn cidr_network(cidr: &str) -> Option<String> {
    let (addr, prefix) = parse_cidr(cidr)?;
    let network: IpAddr = match addr {
        IpAddr::V4(v4) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V4((u32::from(v4) & mask).into())
        }
        IpAddr::V6(v6) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V6((u128::from(v6) & mask).into())
        }
    };
    Some(format!("{network}/{prefix}"))
}

/// The standalone deploy command for `mode`.
pub fn deploy_invocation(mode: DeployMode, config: &UndercloudConfig, options: &DeployOptions) -> Invocation {
    let t = if config.templates.ends_with('/') {
        config.templates.clone()
    } else {
        format!("{}/", config.templates)
    };
    let env_file = |rel: &str| format!("{t}environments/{rel}");

    let mut args: Vec<String> = vec![
        "openstack".into(),
        "tripleo".into(),
        "deploy".into(),
        "--standalone".into(),
        format!("--local-domain={}", config.local_domain),
        format!("--local-ip={}", config.local_ip),
        format!("--templates={}", config.templates),
    ];
    if let Some(roles) = &config.roles_file {
        args.push(format!("--roles-file={roles}"));
    }
    if mode == DeployMode::Upgrade {
        args.extend(["-e".into(), env_file("lifecycle/undercloud-upgrade-prepare.yaml")]);
    }
    args.push("--heat-native".into());
    if let Some(images) = &config.container_images_file {
        args.extend(["-e".into(), images.clone()]);
    }

    let services = [
        (!config.masquerade_networks.is_empty(), "services/masquerade-networks.yaml"),
        (config.enable_ironic, "services/ironic.yaml"),
        (config.enable_ironic_inspector, "services/ironic-inspector.yaml"),
        (config.enable_mistral, "services/mistral.yaml"),
        (config.enable_zaqar, "services/zaqar.yaml"),
        (config.enable_ui, "services/tripleo-ui.yaml"),
        (config.enable_tempest, "services/tempest.yaml"),
        (config.enable_swift_encryption, "services/barbican.yaml"),
        (config.enable_swift_encryption, "barbican-backend-simple-crypto.yaml"),
        (config.generate_service_certificate, "public-tls-undercloud.yaml"),
    ];
    for (_, rel) in services.iter().filter(|(enabled, _)| *enabled) {
        args.extend(["-e".into(), env_file(rel)]);
    }

    args.extend([
        "--public-virtual-ip".into(),
        config.undercloud_public_host.clone(),
        "--control-virtual-ip".into(),
        config.undercloud_admin_host.clone(),
    ]);
    for rel in [
        "ssl/tls-endpoints-public-ip.yaml",
        "use-dns-for-vips.yaml",
        "services/undercloud-haproxy.yaml",
        "services/undercloud-keepalived.yaml",
        "docker.yaml",
        "undercloud.yaml",
    ] {
        args.extend(["-e".into(), env_file(rel)]);
    }

    args.push(format!("--output-dir={}", config.output_dir.display()));
    args.extend(["-e".into(), config.parameters_path().display().to_string()]);
    if options.debug {
        args.push("--debug".into());
    }
    args.push(format!("--log-file={}", options.cwd.join(LOG_FILE).display()));

    Invocation::new("sudo").args(args)
}

/// Commands of the instack-based path, in execution order.
pub fn legacy_invocations(mode: DeployMode) -> Vec<Invocation> {
    match mode {
        DeployMode::Install => vec![Invocation::new("instack-install-undercloud")],
        DeployMode::Upgrade => vec![
            Invocation::new("sudo").args(["yum", "update", "-y", "instack-undercloud"]),
            Invocation::new("instack-pre-upgrade-undercloud"),
            Invocation::new("instack-upgrade-undercloud"),
            Invocation::new("sudo").args(["systemctl", "restart", "openstack-nova-api"]),
        ],
    }
}

fn write_parameters(config: &UndercloudConfig) -> Result<PathBuf, UndercloudError> {
    fs::create_dir_all(&config.output_dir).map_err(|source| UndercloudError::Io {
        path: config.output_dir.clone(),
        source,
    })?;
    let path = config.parameters_path();
    let rendered = serde_yaml::to_string(&config.parameter_defaults()?)?;
    fs::write(&path, rendered).map_err(|source| UndercloudError::Io {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "Wrote undercloud parameters");
    Ok(path)
}

/// Installs or upgrades the undercloud.
pub fn run_undercloud<R: CommandRunner + ?Sized>(
    mode: DeployMode,
    config: &UndercloudConfig,
    options: &DeployOptions,
    runner: &R,
) -> Result<(), UndercloudError> {
    config.trace_loaded();
    if !options.use_heat {
        info!(?mode, "Running instack undercloud scripts");
        for inv in legacy_invocations(mode) {
            runner.run(&inv)?;
        }
        return Ok(());
    }

    if options.validations {
        config.validate()?;
        info!("Undercloud preflight validation passed");
    }
    write_parameters(config)?;
    let inv = deploy_invocation(mode, config, options);
    info!(?mode, command = %inv, "Running undercloud deploy");
    runner.run(&inv)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(output_dir: &Path) -> UndercloudConfig {
        UndercloudConfig {
            container_images_file: Some("/home/stack/foo.yaml".into()),
            output_dir: output_dir.to_path_buf(),
            ..UndercloudConfig::default()
        }
    }

    fn options(debug: bool) -> DeployOptions {
        DeployOptions {
            use_heat: true,
            validations: false,
            debug,
            cwd: PathBuf::from("/tmp"),
        }
    }

    fn tht(rel: &str) -> String {
        format!("/usr/share/openstack-tripleo-heat-templates/environments/{rel}")
    }

    fn tail(output_dir: &str) -> Vec<String> {
        let mut v = vec![
            "--public-virtual-ip".to_owned(),
            "192.168.24.2".into(),
            "--control-virtual-ip".into(),
            "192.168.24.3".into(),
        ];
        for rel in [
            "ssl/tls-endpoints-public-ip.yaml",
            "use-dns-for-vips.yaml",
            "services/undercloud-haproxy.yaml",
            "services/undercloud-keepalived.yaml",
            "docker.yaml",
            "undercloud.yaml",
        ] {
            v.push("-e".into());
            v.push(tht(rel));
        }
        v.push(format!("--output-dir={output_dir}"));
        v.push("-e".into());
        v.push(format!("{output_dir}/undercloud_parameters.yaml"));
        v
    }

    fn default_services() -> Vec<String> {
        let mut v = Vec::new();
        for rel in [
            "services/ironic.yaml",
            "services/ironic-inspector.yaml",
            "services/mistral.yaml",
            "services/zaqar.yaml",
            "services/tripleo-ui.yaml",
            "services/tempest.yaml",
        ] {
            v.push("-e".to_owned());
            v.push(tht(rel));
        }
        v
    }

    fn head(extra: &[&str]) -> Vec<String> {
        let mut v: Vec<String> = [
            "sudo",
            "openstack",
            "tripleo",
            "deploy",
            "--standalone",
            "--local-domain=localdomain",
            "--local-ip=192.168.24.1/24",
            "--templates=/usr/share/openstack-tripleo-heat-templates/",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        v.extend(extra.iter().map(|s| s.to_string()));
        v
    }

    #[test]
    fn install_with_custom_output_and_roles() {
        let mut config = base_config(Path::new("/foo"));
        config.roles_file = Some("foo/roles.yaml".into());

        let mut expected = head(&["--roles-file=foo/roles.yaml", "--heat-native", "-e", "/home/stack/foo.yaml"]);
        expected.extend(default_services());
        expected.extend(["-e".to_owned(), tht("public-tls-undercloud.yaml")]);
        expected.extend(tail("/foo"));
        expected.push("--log-file=/tmp/install-undercloud.log".into());

        let inv = deploy_invocation(DeployMode::Install, &config, &options(false));
        assert_eq!(inv.argv(), expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn swift_encryption_adds_barbican() {
        let mut config = base_config(Path::new("/home/stack"));
        config.enable_swift_encryption = true;

        let mut expected = head(&["--heat-native", "-e", "/home/stack/foo.yaml"]);
        expected.extend(default_services());
        expected.extend([
            "-e".to_owned(),
            tht("services/barbican.yaml"),
            "-e".into(),
            tht("barbican-backend-simple-crypto.yaml"),
            "-e".into(),
            tht("public-tls-undercloud.yaml"),
        ]);
        expected.extend(tail("/home/stack"));
        expected.push("--log-file=/tmp/install-undercloud.log".into());

        let inv = deploy_invocation(DeployMode::Install, &config, &options(false));
        assert_eq!(inv.argv(), expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn upgrade_with_debug_adds_prepare_env_and_debug_flag() {
        let config = base_config(Path::new("/home/stack"));

        let prepare = tht("lifecycle/undercloud-upgrade-prepare.yaml");
        let mut expected = head(&["-e", prepare.as_str(), "--heat-native", "-e", "/home/stack/foo.yaml"]);
        expected.extend(default_services());
        expected.extend(["-e".to_owned(), tht("public-tls-undercloud.yaml")]);
        expected.extend(tail("/home/stack"));
        expected.push("--debug".into());
        expected.push("--log-file=/tmp/install-undercloud.log".into());

        let inv = deploy_invocation(DeployMode::Upgrade, &config, &options(true));
        assert_eq!(inv.argv(), expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn masquerade_networks_come_first_among_services() {
        let mut config = base_config(Path::new("/home/stack"));
        config.masquerade_networks = vec!["192.168.24.0/24".into()];
        let inv = deploy_invocation(DeployMode::Install, &config, &options(false));
        let masq = inv.args.iter().position(|a| a.ends_with("masquerade-networks.yaml")).unwrap();
        let ironic = inv.args.iter().position(|a| a.ends_with("services/ironic.yaml")).unwrap();
        let images = inv.args.iter().position(|a| a == "/home/stack/foo.yaml").unwrap();
        assert!(images < masq && masq < ironic);
    }

    #[test]
    fn legacy_upgrade_runs_instack_sequence() {
        let cmds: Vec<String> = legacy_invocations(DeployMode::Upgrade)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            cmds,
            vec![
                "sudo yum update -y instack-undercloud",
                "instack-pre-upgrade-undercloud",
                "instack-upgrade-undercloud",
                "sudo systemctl restart openstack-nova-api",
            ]
        );
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let ok = UndercloudConfig::default();
        assert!(ok.validate().is_ok());

        let bad_ip = UndercloudConfig {
            local_ip: "192.168.24.1".into(),
            ..UndercloudConfig::default()
        };
        assert!(matches!(bad_ip.validate(), Err(UndercloudError::Configuration(_))));

        let same_hosts = UndercloudConfig {
            undercloud_admin_host: "192.168.24.2".into(),
            ..UndercloudConfig::default()
        };
        assert!(matches!(same_hosts.validate(), Err(UndercloudError::Configuration(_))));

        let bad_dns = UndercloudConfig {
            undercloud_nameservers: vec!["dns.example".into()],
            ..UndercloudConfig::default()
        };
        assert!(bad_dns.validate().is_err());
    }

    const NET_CONFIG_TEMPLATE: &str = r#"
        "network_config": [
         {
          "type": "ovs_bridge",
          "name": "br-ctlplane",
          "ovs_extra": [
           "br-set-external-id br-ctlplane bridge-id br-ctlplane"
          ],
          "members": [
           {
            "type": "interface",
            "name": "{{LOCAL_INTERFACE}}",
            "primary": "true",
            "mtu": {{LOCAL_MTU}},
            "dns_servers": {{UNDERCLOUD_NAMESERVERS}}
           }
          ],
          "addresses": [
            {
              "ip_netmask": "{{PUBLIC_INTERFACE_IP}}"
            }
          ],
          "routes": {{SUBNETS_STATIC_ROUTES}},
          "mtu": {{LOCAL_MTU}}
        }
        ]
    "#;

    fn network_config() -> UndercloudConfig {
        UndercloudConfig {
            local_interface: "ethX".into(),
            local_mtu: 1234,
            undercloud_public_host: "4.3.2.1".into(),
            undercloud_nameservers: vec!["8.8.8.8".into(), "8.8.4.4".into()],
            masquerade_networks: vec!["10.0.0.0/8".into()],
            ..UndercloudConfig::default()
        }
    }

    #[test]
    fn parameters_carry_network_settings() {
        let params = network_config().parameter_defaults().unwrap();
        let defaults = &params["parameter_defaults"];
        assert_eq!(defaults["NeutronPublicInterface"], "ethX");
        assert_eq!(defaults["UndercloudLocalMtu"], 1234);
        assert_eq!(defaults["DnsServers"], "8.8.8.8,8.8.4.4");
        assert_eq!(defaults["MasqueradeNetworks"]["192.168.24.0/24"][0], "10.0.0.0/8");
        assert!(
            defaults.get("UndercloudNetConfigOverride").is_none(),
            "no override without a net_config_override template"
        );
    }

    #[test]
    fn net_config_override_renders_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("net-config.json");
        fs::write(&template, NET_CONFIG_TEMPLATE).unwrap();
        let config = UndercloudConfig {
            net_config_override: Some(template),
            ..network_config()
        };

        let params = config.parameter_defaults().unwrap();

        let expected = json!({
            "network_config": [{
                "type": "ovs_bridge",
                "name": "br-ctlplane",
                "ovs_extra": ["br-set-external-id br-ctlplane bridge-id br-ctlplane"],
                "members": [{
                    "type": "interface",
                    "name": "ethX",
                    "primary": "true",
                    "mtu": 1234,
                    "dns_servers": ["8.8.8.8", "8.8.4.4"]
                }],
                "addresses": [{ "ip_netmask": "4.3.2.1" }],
                "routes": [],
                "mtu": 1234
            }]
        });
        assert_eq!(params["parameter_defaults"]["UndercloudNetConfigOverride"], expected);
    }

    #[test]
    fn net_config_override_must_exist_and_parse() {
        let dir = tempfile::tempdir().unwrap();
        let missing = UndercloudConfig {
            net_config_override: Some(dir.path().join("absent.json")),
            ..UndercloudConfig::default()
        };
        assert!(matches!(missing.validate(), Err(UndercloudError::Configuration(_))));
        assert!(matches!(missing.parameter_defaults(), Err(UndercloudError::Read { .. })));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, r#""network_config": [{{LOCAL_INTERFACE}}]"#).unwrap();
        let config = UndercloudConfig {
            net_config_override: Some(broken),
            ..UndercloudConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(matches!(config.parameter_defaults(), Err(UndercloudError::Configuration(_))));
    }

    #[test]
    fn partial_yaml_takes_defaults() {
        let config: UndercloudConfig = serde_yaml::from_str("local_ip: 10.0.0.1/16\nenable_ui: false\n").unwrap();
        assert_eq!(config.local_ip, "10.0.0.1/16");
        assert!(!config.enable_ui);
        assert!(config.enable_ironic);
        assert_eq!(config.local_domain, "localdomain");
    }

    #[test]
    fn cidr_network_masks_host_bits() {
        assert_eq!(cidr_network("192.168.24.1/24").as_deref(), Some("192.168.24.0/24"));
        assert_eq!(cidr_network("10.1.2.3/0").as_deref(), Some("0.0.0.0/0"));
        assert_eq!(cidr_network("fd00::5/64").as_deref(), Some("fd00::/64"));
        assert!(cidr_network("10.0.0.1/33").is_none());
    }
}
