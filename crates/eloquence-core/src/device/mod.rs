//! Output device discovery: which rate does the device actually mix at?
//!
//! The query is best effort. Any failure (no COM, no endpoint, activation
//! refused) yields `None` and the pipeline keeps the configured rate.

#[cfg(windows)]
mod wasapi;

#[cfg(windows)]
pub use wasapi::WasapiDeviceApi;

use crate::config::OutputDevice;
use crate::error::{EloquenceError, EloquenceResult};
use std::sync::Arc;
use tracing::debug;

/// Outcome of initializing the OS component runtime on the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComInit {
    /// This call initialized the runtime and must balance it
    Initialized,
    /// The thread was already set up by someone else; leave it alone
    AlreadyInitialized,
}

/// OS audio-device API. Read-only.
pub trait DeviceApi: Send + Sync {
    /// Initialize the component runtime for the calling thread
    ///
    /// # Errors
    ///
    /// Returns an audio device error if the runtime is unavailable
    fn initialize(&self) -> EloquenceResult<ComInit>;

    /// Balance a successful [`DeviceApi::initialize`] that returned `Initialized`
    fn uninitialize(&self);

    /// Create a device enumerator
    ///
    /// # Errors
    ///
    /// Returns an audio device error if the enumerator cannot be created
    fn enumerator(&self) -> EloquenceResult<Box<dyn DeviceEnumerator>>;
}

/// Lists render endpoints
pub trait DeviceEnumerator {
    /// The default render endpoint
    ///
    /// # Errors
    ///
    /// Returns an audio device error if there is no default endpoint
    fn default_endpoint(&self) -> EloquenceResult<Box<dyn Endpoint>>;

    /// The endpoint with the given identifier
    ///
    /// # Errors
    ///
    /// Returns an audio device error if no endpoint matches
    fn endpoint(&self, id: &str) -> EloquenceResult<Box<dyn Endpoint>>;

    /// The active render endpoint whose friendly name matches `name`
    /// (see [`device_name_matches`])
    ///
    /// # Errors
    ///
    /// Returns an audio device error if no active endpoint carries the name
    fn endpoint_by_name(&self, name: &str) -> EloquenceResult<Box<dyn Endpoint>>;
}

/// Whether an endpoint's friendly name matches a configured device name.
///
/// Surrounding whitespace and letter case are ignored.
#[must_use]
pub fn device_name_matches(friendly_name: &str, wanted: &str) -> bool {
    let wanted = wanted.trim();
    !wanted.is_empty() && friendly_name.trim().to_lowercase() == wanted.to_lowercase()
}

/// One render endpoint
pub trait Endpoint {
    /// Activate an audio client on the endpoint
    ///
    /// # Errors
    ///
    /// Returns an audio device error if activation fails
    fn activate(&self) -> EloquenceResult<Box<dyn AudioClient>>;
}

/// An activated audio client
pub trait AudioClient {
    /// Sample rate of the shared-mode mix format
    ///
    /// # Errors
    ///
    /// Returns an audio device error if the format cannot be read
    fn mix_sample_rate(&self) -> EloquenceResult<u32>;
}

/// Stand-in for platforms without a device API; every query fails
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedDeviceApi;

impl DeviceApi for UnsupportedDeviceApi {
    fn initialize(&self) -> EloquenceResult<ComInit> {
        Err(EloquenceError::audio_device(
            "Device queries are not supported on this platform",
        ))
    }

    fn uninitialize(&self) {}

    fn enumerator(&self) -> EloquenceResult<Box<dyn DeviceEnumerator>> {
        Err(EloquenceError::audio_device(
            "Device queries are not supported on this platform",
        ))
    }
}

/// Balances a runtime initialization when dropped, if this scope owns it.
struct ComScope<'a> {
    api: &'a dyn DeviceApi,
    owned: bool,
}

impl<'a> ComScope<'a> {
    fn enter(api: &'a dyn DeviceApi) -> EloquenceResult<Self> {
        let owned = api.initialize()? == ComInit::Initialized;
        Ok(Self { api, owned })
    }
}

impl Drop for ComScope<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.api.uninitialize();
        }
    }
}

/// Queries the output device for its native mix rate.
#[derive(Clone)]
pub struct SampleRateNegotiator {
    api: Arc<dyn DeviceApi>,
}

impl SampleRateNegotiator {
    /// Use a specific device API
    #[must_use]
    pub fn new(api: Arc<dyn DeviceApi>) -> Self {
        Self { api }
    }

    /// The platform's device API
    #[must_use]
    pub fn system() -> Self {
        #[cfg(windows)]
        {
            Self::new(Arc::new(WasapiDeviceApi))
        }
        #[cfg(not(windows))]
        {
            Self::new(Arc::new(UnsupportedDeviceApi))
        }
    }

    /// Native mix rate of `device`, or `None` if it cannot be determined.
    ///
    /// A named device is looked up by endpoint id first, then by friendly
    /// name among the active render endpoints; if neither matches, the
    /// default endpoint is used. Resources are released client first,
    /// runtime last.
    #[must_use]
    pub fn resolve(&self, device: &OutputDevice) -> Option<u32> {
        match self.query(device) {
            Ok(hz) => {
                debug!("Output device {:?} mixes at {} Hz", device, hz);
                Some(hz)
            }
            Err(e) => {
                debug!("Could not query output device {:?}: {}", device, e);
                None
            }
        }
    }

    fn query(&self, device: &OutputDevice) -> EloquenceResult<u32> {
        let _scope = ComScope::enter(self.api.as_ref())?;
        let enumerator = self.api.enumerator()?;
        let endpoint = match device.id() {
            Some(id) => match enumerator
                .endpoint(id)
                .or_else(|_| enumerator.endpoint_by_name(id))
            {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    debug!("Device {} not found ({}), using default endpoint", id, e);
                    enumerator.default_endpoint()?
                }
            },
            None => enumerator.default_endpoint()?,
        };
        let client = endpoint.activate()?;
        let hz = client.mix_sample_rate()?;
        if hz == 0 {
            return Err(EloquenceError::audio_device("Device reported a zero mix rate"));
        }
        Ok(hz)
    }
}

impl std::fmt::Debug for SampleRateNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRateNegotiator").finish_non_exhaustive()
    }
}
