// Services module

pub mod data_service;
pub mod memory;
pub mod supabase;

pub use data_service::DataService;
pub use memory::MemoryService;
pub use supabase::SupabaseService;
