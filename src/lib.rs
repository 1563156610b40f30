pub mod cluster;
pub mod comm;
pub mod datum;
pub mod exec;
pub mod exchange;
pub mod executor;
pub mod parallelize;
pub mod plan;
pub mod row;
pub mod shmem;
