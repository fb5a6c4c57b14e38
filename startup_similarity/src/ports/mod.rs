pub mod embedding_provider;
pub mod vector_index_store;
