pub mod index_entry_memory_repository;
pub mod index_entry_qdrant_repository;
