pub mod call;
pub mod channel_provider;
pub mod client;
pub mod interceptor;
pub mod reconnection;
pub mod subscription;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;

#[cfg(test)]
mod test {
    use tracing::Level;

    use esdb_core::ext::init_logger;

    #[ctor::ctor]
    fn init() {
        init_logger(Level::DEBUG)
    }
}
