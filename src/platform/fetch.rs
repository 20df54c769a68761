//! Platforms that hand over a request value and take a response value back,
//! like edge function runtimes.

use super::Platform;
use crate::http::{Request, Response};
use crate::{normalize, translate, Config, Error};

/// A request-in, response-out platform.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fetch;

/// Holds the response produced for a [`Fetch`] call.
#[derive(Debug, Default)]
pub struct Slot(Option<Response>);

impl Slot {
    pub fn new() -> Self {
        Slot(None)
    }

    pub fn is_filled(&self) -> bool {
        self.0.is_some()
    }

    pub fn into_inner(self) -> Option<Response> {
        self.0
    }
}

#[async_trait::async_trait]
impl Platform for Fetch {
    type Inbound = Request;
    type Outbound = Slot;

    async fn read(&self, inbound: Request, config: &Config) -> Result<Request, Error> {
        let (parts, body) = inbound.into_parts();
        normalize::normalize(parts, body, config).await
    }

    async fn write(&self, response: Response, slot: &mut Slot) -> Result<(), Error> {
        if slot.is_filled() {
            return Err(Error::translation("response already produced"));
        }

        slot.0 = Some(translate::for_fetch(response));
        Ok(())
    }

    fn committed(&self, slot: &Slot) -> bool {
        slot.is_filled()
    }
}
