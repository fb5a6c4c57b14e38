pub mod dataset_loader;
pub mod helpers;
pub mod mock_embedding;
pub mod remote_embedding;
