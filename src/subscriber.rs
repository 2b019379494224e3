use crate::error::Error;

use async_trait::async_trait;

// A subscription to one ordered feed topic. Consumers call subscribe once
// and then receive message bodies for the life of the process.
#[async_trait]
pub trait Subscriber {
    async fn subscribe(&mut self) -> Result<(), Error>;
    async fn receive(&mut self) -> Result<Vec<u8>, Error>;
}
