pub mod store;

pub mod pipeline_repo;
pub use pipeline_repo::PipelineRepository;
pub mod outbox_repo;
pub use outbox_repo::OutboxRepository;

#[cfg(test)]
pub mod memory;
