use esdb_core::endpoint::Endpoint;

/// A long-lived, reusable transport handle to one node. Connection establishment is lazy and
/// belongs to the transport, so creating a channel never fails.
pub trait Channel: Send + Sync + 'static {
    fn endpoint(&self) -> &Endpoint;

    /// Called exactly once when the owning cache forgets this channel's endpoint.
    fn dispose(&self) {}
}

pub trait ChannelFactory<C>: Send + Sync + 'static {
    fn create(&self, endpoint: &Endpoint) -> C;
}

impl<F, C> ChannelFactory<C> for F
where
    F: Fn(&Endpoint) -> C + Send + Sync + 'static,
    C: Channel,
{
    fn create(&self, endpoint: &Endpoint) -> C {
        self(endpoint)
    }
}
