//! Node identity derived from the host name.
//!
//! Camera nodes are usually named after their position (`cam-07`,
//! `vsn3`), so the digits in the host name give a usable node id.

use shared::packet::NodeId;

/// Host name of this machine, if the OS reports one
pub fn host_name() -> Option<String> {
    sysinfo::System::host_name()
}

/// All digits of `host_name`, concatenated, as a node id.
///
/// `None` when there are no digits or they overflow a [`NodeId`].
pub fn node_id_from_host_name(host_name: &str) -> Option<NodeId> {
    let digits: String = host_name.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}
