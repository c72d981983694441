pub mod docker_repository;
pub mod gpu_repository;
pub mod output_repository;
