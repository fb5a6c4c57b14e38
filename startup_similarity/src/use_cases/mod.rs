pub mod analyze_idea;
pub mod search_similar;
pub mod sync_dataset;
