//! The resident voxel world: chunk and mesh stores, generation and meshing,
//! the streaming scheduler and the world facade.

pub mod chunk_store;
pub mod generator;
pub mod mesh_store;
pub mod mesher;
pub mod streamer;
pub mod world;
