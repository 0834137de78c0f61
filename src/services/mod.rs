pub mod backend;
pub mod bucket_lifecycle;
pub mod gateway;
pub mod local_store;
pub mod multipart_orchestrator;
pub mod object_versions;
pub mod part_planner;
pub mod part_signer;

#[cfg(test)]
pub mod test_support;
