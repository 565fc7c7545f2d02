//! Data model: the entities a conductor reads, mutates, and persists.
//!
//! Storage is abstracted behind `crate::repository::NodeRepository`; these
//! types are the in-memory shapes shared by every subsystem (`ring`,
//! `reservation`, `fsm`, `executor`, `periodics`, `rpc`).

pub mod allocation;
pub mod bios;
pub mod conductor_record;
pub mod deploy_template;
pub mod driver_internal_info;
pub mod history;
pub mod node;
pub mod node_trait;
pub mod object_version;
pub mod port;
pub mod step;
pub mod volume;

pub use allocation::{Allocation, AllocationState};
pub use bios::{diff_settings, AttributeType, BiosDiff, BiosSetting};
pub use conductor_record::ConductorRecord;
pub use deploy_template::{matching_templates, DeployTemplate};
pub use driver_internal_info::DriverInternalInfo;
pub use history::{NodeHistoryEntry, Severity};
pub use node::{Node, PowerState, ProvisionState};
pub use node_trait::NodeTrait;
pub use object_version::{ObjectVersion, Versioned};
pub use port::{Port, PortGroup};
pub use step::{order_automated, order_manual, InterfaceKind, Step};
pub use volume::{VolumeConnector, VolumeTarget};
