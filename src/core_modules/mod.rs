pub mod cluster;
pub mod cluster_pass;
pub mod feature;
pub mod grid_index;
pub mod mapping;
pub mod position;
pub mod projector;
pub mod record_sort;
