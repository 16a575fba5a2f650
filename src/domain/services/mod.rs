mod server_selector;

pub use server_selector::ServerSelector;
