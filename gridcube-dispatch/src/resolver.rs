use async_trait::async_trait;
use gridcube_core::{DeviceAddress, PublicDeviceId, WirelessDeviceId};
use tracing::{debug, instrument, warn};

/// Lookup side of the device mapping table.
#[async_trait]
pub trait AddressStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn lookup_wireless_id(
        &self,
        public_id: &PublicDeviceId,
    ) -> Result<Option<WirelessDeviceId>, Self::Error>;

    async fn lookup_public_id(
        &self,
        wireless_id: &WirelessDeviceId,
    ) -> Result<Option<PublicDeviceId>, Self::Error>;
}

/// Translates between public and wireless device ids.
///
/// Both directions are best-effort. When the other form cannot be found,
/// or the store fails, the classified input comes back unchanged and the
/// miss is logged.
#[derive(Clone)]
pub struct DeviceAddressResolver<S> {
    store: S,
}

impl<S: AddressStore> DeviceAddressResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolves to the form used on the wireless network.
    #[instrument(skip(self))]
    pub async fn resolve_for_communication(&self, raw: &str) -> DeviceAddress {
        match DeviceAddress::classify(raw) {
            DeviceAddress::Public(public_id) => {
                match self.store.lookup_wireless_id(&public_id).await {
                    Ok(Some(wireless_id)) => DeviceAddress::Wireless(wireless_id),
                    Ok(None) => {
                        debug!(device_id = %public_id, "No wireless id mapped");
                        DeviceAddress::Public(public_id)
                    }
                    Err(e) => {
                        warn!(error = %e, device_id = %public_id, "Wireless id lookup failed");
                        DeviceAddress::Public(public_id)
                    }
                }
            }
            other => other,
        }
    }

    /// Resolves to the form shown to API callers and used to key readings.
    #[instrument(skip(self))]
    pub async fn resolve_for_response(&self, raw: &str) -> DeviceAddress {
        match DeviceAddress::classify(raw) {
            DeviceAddress::Wireless(wireless_id) => self.public_for(wireless_id).await,
            other => other,
        }
    }

    pub async fn public_for(&self, wireless_id: WirelessDeviceId) -> DeviceAddress {
        match self.store.lookup_public_id(&wireless_id).await {
            Ok(Some(public_id)) => DeviceAddress::Public(public_id),
            Ok(None) => {
                debug!(wireless_id = %wireless_id, "No public id mapped");
                DeviceAddress::Wireless(wireless_id)
            }
            Err(e) => {
                warn!(error = %e, wireless_id = %wireless_id, "Public id lookup failed");
                DeviceAddress::Wireless(wireless_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use uuid::Uuid;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("store offline")]
    struct Offline;

    #[derive(Clone, Default)]
    struct FixedStore {
        pairs: HashMap<PublicDeviceId, WirelessDeviceId>,
        offline: bool,
    }

    #[async_trait]
    impl AddressStore for FixedStore {
        type Error = Offline;

        async fn lookup_wireless_id(
            &self,
            public_id: &PublicDeviceId,
        ) -> Result<Option<WirelessDeviceId>, Offline> {
            if self.offline {
                return Err(Offline);
            }
            Ok(self.pairs.get(public_id).copied())
        }

        async fn lookup_public_id(
            &self,
            wireless_id: &WirelessDeviceId,
        ) -> Result<Option<PublicDeviceId>, Offline> {
            if self.offline {
                return Err(Offline);
            }
            Ok(self
                .pairs
                .iter()
                .find(|(_, w)| *w == wireless_id)
                .map(|(p, _)| p.clone()))
        }
    }

    fn mapped() -> (FixedStore, PublicDeviceId, WirelessDeviceId) {
        let public_id = PublicDeviceId::parse("000012").unwrap();
        let wireless_id = WirelessDeviceId(Uuid::new_v4());
        let mut store = FixedStore::default();
        store.pairs.insert(public_id.clone(), wireless_id);
        (store, public_id, wireless_id)
    }

    #[tokio::test]
    async fn public_resolves_to_wireless_and_back() {
        let (store, public_id, wireless_id) = mapped();
        let resolver = DeviceAddressResolver::new(store);

        assert_eq!(
            resolver.resolve_for_communication("000012").await,
            DeviceAddress::Wireless(wireless_id)
        );
        assert_eq!(
            resolver
                .resolve_for_response(&wireless_id.to_string())
                .await,
            DeviceAddress::Public(public_id)
        );
    }

    #[tokio::test]
    async fn communication_is_idempotent_on_wireless_input() {
        let (store, _, wireless_id) = mapped();
        let resolver = DeviceAddressResolver::new(store);

        let once = resolver
            .resolve_for_communication(&wireless_id.to_string())
            .await;
        let twice = resolver.resolve_for_communication(&once.to_string()).await;

        assert_eq!(once, DeviceAddress::Wireless(wireless_id));
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn unmapped_public_id_falls_back_to_input() {
        let resolver = DeviceAddressResolver::new(FixedStore::default());
        let resolved = resolver.resolve_for_communication("000099").await;

        assert_eq!(resolved.to_string(), "000099");
        assert!(resolved.wireless().is_none());
    }

    #[tokio::test]
    async fn store_failure_falls_back_to_input() {
        let (mut store, _, wireless_id) = mapped();
        store.offline = true;
        let resolver = DeviceAddressResolver::new(store);

        assert_eq!(
            resolver.resolve_for_communication("000012").await.to_string(),
            "000012"
        );
        assert_eq!(
            resolver
                .resolve_for_response(&wireless_id.to_string())
                .await,
            DeviceAddress::Wireless(wireless_id)
        );
    }

    #[tokio::test]
    async fn unrecognized_input_passes_through() {
        let resolver = DeviceAddressResolver::new(FixedStore::default());
        assert_eq!(
            resolver.resolve_for_communication("meter-7").await,
            DeviceAddress::Unrecognized("meter-7".into())
        );
    }
}
