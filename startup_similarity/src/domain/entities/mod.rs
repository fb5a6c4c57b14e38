pub mod dataset_record;
pub mod index_entry;
