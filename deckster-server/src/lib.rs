pub mod http;
pub mod router;
pub mod server;
pub mod subsystems;

#[cfg(test)]
mod testing;
