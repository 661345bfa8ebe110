//! vApp deployment parameters and the guest properties derived from them.

/// Password baked into every deployed appliance for the `tempest` user.
pub const ADMIN_PASSWORD: &str = "tempest";

/// Deployment parameters for a single vApp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VappConfig {
    /// vApp and template name.
    pub name: String,
    /// Static address assigned to the first NIC.
    pub ip: String,
    /// Default gateway for the VM network.
    pub gateway: String,
    /// Netmask for the VM network.
    pub netmask: String,
    /// Comma-separated DNS servers.
    pub dns: String,
    /// Comma-separated NTP servers.
    pub ntp: String,
    /// Catalog the template is uploaded into.
    pub catalog: String,
    /// Organisation VDC network the vApp is bridged onto.
    pub network: String,
}

/// One OVF product-section property pushed to the guest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProductProperty {
    /// OVF property type; always `string` for the appliance properties.
    pub kind: &'static str,
    /// Property key understood by the appliance.
    pub key: &'static str,
    /// Value assigned to the property.
    pub value: String,
    /// Whether the value is masked in the vCloud UI.
    pub password: bool,
    /// Whether operators may edit the value after deployment.
    pub user_configurable: bool,
    /// Human readable label.
    pub label: &'static str,
    /// Help text shown next to the property.
    pub description: &'static str,
}

impl ProductProperty {
    const fn string(
        key: &'static str,
        value: String,
        label: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            kind: "string",
            key,
            value,
            password: false,
            user_configurable: true,
            label,
            description,
        }
    }

    const fn masked(mut self) -> Self {
        self.password = true;
        self
    }
}

impl VappConfig {
    /// Builds the ordered guest properties for this vApp.
    ///
    /// The appliance reads its network configuration from these keys on first
    /// boot, so both the key names and their order are fixed.
    #[must_use]
    pub fn properties(&self) -> Vec<ProductProperty> {
        vec![
            ProductProperty::string(
                "gateway",
                self.gateway.clone(),
                "Default Gateway",
                "The default gateway address for the VM network. Leave blank if DHCP is desired.",
            ),
            ProductProperty::string(
                "DNS",
                self.dns.clone(),
                "DNS",
                "The domain name servers for the VM (comma separated). Leave blank if DHCP is desired.",
            ),
            ProductProperty::string(
                "ntp_servers",
                self.ntp.clone(),
                "NTP Servers",
                "Comma-delimited list of NTP servers",
            ),
            ProductProperty::string(
                "admin_password",
                ADMIN_PASSWORD.to_owned(),
                "Admin Password",
                "This password is used to SSH into the VM. The username is \"tempest\".",
            )
            .masked(),
            ProductProperty::string(
                "ip0",
                self.ip.clone(),
                "IP Address",
                "The IP address for the VM. Leave blank if DHCP is desired.",
            ),
            ProductProperty::string(
                "netmask0",
                self.netmask.clone(),
                "Netmask",
                "The netmask for the VM network. Leave blank if DHCP is desired.",
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VappConfig {
        VappConfig {
            name: String::from("ops-manager"),
            ip: String::from("10.0.0.5"),
            gateway: String::from("10.0.0.1"),
            netmask: String::from("255.255.255.0"),
            dns: String::from("8.8.8.8"),
            ntp: String::from("ntp.example.com"),
            catalog: String::from("pcf"),
            network: String::from("ext-net"),
        }
    }

    #[test]
    fn properties_follow_appliance_order() {
        let keys: Vec<_> = config().properties().iter().map(|p| p.key).collect();
        assert_eq!(
            keys,
            ["gateway", "DNS", "ntp_servers", "admin_password", "ip0", "netmask0"]
        );
    }

    #[test]
    fn properties_carry_config_values() {
        let values: Vec<_> = config()
            .properties()
            .into_iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(
            values,
            [
                "10.0.0.1",
                "8.8.8.8",
                "ntp.example.com",
                "tempest",
                "10.0.0.5",
                "255.255.255.0"
            ]
        );
    }

    #[test]
    fn only_admin_password_is_masked() {
        let properties = config().properties();
        let masked: Vec<_> = properties
            .iter()
            .filter(|p| p.password)
            .map(|p| p.key)
            .collect();
        assert_eq!(masked, ["admin_password"]);
        assert!(properties
            .iter()
            .all(|p| p.kind == "string" && p.user_configurable));
    }

    #[test]
    fn equal_configs_compare_equal() {
        assert_eq!(config(), config());
        let other = VappConfig {
            ip: String::from("10.0.0.6"),
            ..config()
        };
        assert_ne!(config(), other);
    }
}
