use crate::error::Error;

use async_trait::async_trait;

// Long-running components (feed consumers, the reference refresher) that own
// their loop. run only returns on a fatal error or shutdown.
#[async_trait]
pub trait Manager {
    async fn run(&mut self) -> Result<(), Error>;
}
