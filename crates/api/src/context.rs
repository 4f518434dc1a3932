use fulfillment_core::Caller;

/// Caller identity for a request, as asserted by the gateway.
///
/// Inserted by [`crate::middleware::identity_middleware`] and required by
/// every `/api` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    caller: Caller,
}

impl CallerContext {
    pub fn new(caller: Caller) -> Self {
        Self { caller }
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }
}
