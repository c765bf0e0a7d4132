mod cri_log;
mod instance_registry;
mod mount_plan;
mod namespace_plans;
mod rpc_redirect;
mod rpc_worker;
mod status_archive;
mod support;
