pub mod capacity_service;
pub mod cluster_service;
pub mod context;
pub mod hypervisor_service;
pub mod lifecycle;
pub mod network_service;
pub mod scheduler;
pub mod sequence_service;
pub mod storage_service;
pub mod vm_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use capacity_service::*;
pub use cluster_service::*;
pub use context::OpContext;
pub use hypervisor_service::*;
pub use network_service::*;
pub use scheduler::*;
pub use sequence_service::SequenceService;
pub use storage_service::*;
pub use vm_service::*;
