//! Reading fan-out behind the link workers.
//!
//! Workers only know the [`Sink`] trait; the production implementation,
//! [`ReadingPipeline`], archives each reading locally and submits its
//! metrics to the delivery queue as two batches, one per backend host.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::KeyMap;
use crate::delivery::DeliveryQueue;
use crate::error::Result;
use crate::reading::Reading;
use crate::storage::TsvStore;

/// Consumer of decoded readings. Implementations must tolerate concurrent
/// calls from any number of link workers.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn store_reading(&self, reading: &Reading) -> Result<()>;
    async fn deliver_reading(&self, reading: &Reading) -> Result<()>;
}

/// Archive plus backend delivery.
pub struct ReadingPipeline {
    store: TsvStore,
    delivery: Arc<DeliveryQueue>,
    keys: KeyMap,
}

impl ReadingPipeline {
    pub fn new(store: TsvStore, delivery: Arc<DeliveryQueue>, keys: KeyMap) -> Self {
        Self {
            store,
            delivery,
            keys,
        }
    }

    /// Each sensor category is a distinct backend host: `<station>_IN` for
    /// the inclinometer, `<station>_PL` for the rain gauge.
    fn inclinometer_batch(&self, reading: &Reading) -> (String, Vec<(String, String)>) {
        let host = format!(
            "{}{}",
            reading.station_name, self.keys.inclinometer_host_suffix
        );
        let incl = &reading.inclinometer;
        let items = vec![
            (self.keys.radial.clone(), incl.radial.to_string()),
            (self.keys.tangential.clone(), incl.tangential.to_string()),
            (self.keys.temperature.clone(), incl.temperature.to_string()),
            (self.keys.incl_voltage.clone(), incl.voltage.to_string()),
        ];
        (host, items)
    }

    fn pluviometer_batch(&self, reading: &Reading) -> (String, Vec<(String, String)>) {
        let host = format!(
            "{}{}",
            reading.station_name, self.keys.pluviometer_host_suffix
        );
        let pluvio = &reading.pluviometer;
        let items = vec![
            (self.keys.rain_level.clone(), pluvio.rain_level.to_string()),
            (self.keys.pluvio_voltage.clone(), pluvio.voltage.to_string()),
        ];
        (host, items)
    }
}

#[async_trait]
impl Sink for ReadingPipeline {
    async fn store_reading(&self, reading: &Reading) -> Result<()> {
        self.store.store(reading).await
    }

    async fn deliver_reading(&self, reading: &Reading) -> Result<()> {
        let (host, items) = self.inclinometer_batch(reading);
        self.delivery.submit(&host, &items).await?;

        let (host, items) = self.pluviometer_batch(reading);
        self.delivery.submit(&host, &items).await?;
        Ok(())
    }
}
