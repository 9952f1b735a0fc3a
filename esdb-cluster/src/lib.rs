pub mod channel;
pub mod channel_cache;
pub mod channel_selector;
pub mod gossip;
pub mod gossip_channel_selector;
pub mod node_selector;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

#[cfg(test)]
mod test {
    use tracing::Level;

    use esdb_core::ext::init_logger;

    #[ctor::ctor]
    fn init() {
        init_logger(Level::DEBUG)
    }
}
