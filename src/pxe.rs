//! PXE boot filter: pure decision logic behind the `pxe_filter` auxiliary
//! service. A DHCP/PXE proxy calls out to this for every booting MAC
//! address before handing out a boot image; the service itself is a thin
//! CLI wrapper (`src/bin/pxe_filter.rs`) over `should_serve_pxe_boot`.

use crate::model::{Node, PortGroup, ProvisionState};

/// States in which the conductor expects the node to chain-load a ramdisk
/// over PXE. Outside these, PXE-booting is either unnecessary (the node is
/// idle) or actively wrong (it would interrupt a deployed tenant instance).
fn expects_pxe_boot(state: ProvisionState) -> bool {
    matches!(
        state,
        ProvisionState::Deploying
            | ProvisionState::Cleaning
            | ProvisionState::CleanWait
            | ProvisionState::Inspecting
            | ProvisionState::Rescuing
            | ProvisionState::Servicing
    )
}

/// Decide whether a booting MAC address should be served a boot image.
/// `port` is the matching port record for the MAC, if any is enrolled;
/// `node` is the node it belongs to. Unknown MACs, disabled ports, and
/// nodes not mid-ramdisk-operation are all refused.
pub fn should_serve_pxe_boot(node: Option<&Node>, pxe_enabled: bool) -> bool {
    match node {
        Some(node) => pxe_enabled && expects_pxe_boot(node.provision_state),
        None => false,
    }
}

/// Same decision for a port belonging to a port group rather than directly
/// to a node (bonded NICs): the group's own `address` is what DHCP sees.
pub fn portgroup_matches(portgroup: &PortGroup, mac_address: &str) -> bool {
    portgroup.address.as_deref().map(|a| a.eq_ignore_ascii_case(mac_address)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    #[test]
    fn test_refuses_unknown_mac() {
        assert!(!should_serve_pxe_boot(None, true));
    }

    #[test]
    fn test_refuses_pxe_disabled_port() {
        let node = Node::new("redfish", "default");
        assert!(!should_serve_pxe_boot(Some(&node), false));
    }

    #[test]
    fn test_serves_node_mid_clean() {
        let mut node = Node::new("redfish", "default");
        node.provision_state = ProvisionState::Cleaning;
        assert!(should_serve_pxe_boot(Some(&node), true));
    }

    #[test]
    fn test_refuses_active_node() {
        let mut node = Node::new("redfish", "default");
        node.provision_state = ProvisionState::Active;
        assert!(!should_serve_pxe_boot(Some(&node), true));
    }
}
