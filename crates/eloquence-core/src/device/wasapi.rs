//! WASAPI implementation of the device API.
#![allow(unsafe_code)]

use super::{device_name_matches, AudioClient, ComInit, DeviceApi, DeviceEnumerator, Endpoint};
use crate::error::{EloquenceError, EloquenceResult};
use windows::core::HSTRING;
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::{
    eConsole, eRender, IAudioClient, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator,
    DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED, STGM_READ,
};

fn device_error(context: &str, err: &windows::core::Error) -> EloquenceError {
    EloquenceError::audio_device(format!("{context}: {err}"))
}

/// Device API backed by the Windows multimedia device enumerator.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasapiDeviceApi;

impl DeviceApi for WasapiDeviceApi {
    fn initialize(&self) -> EloquenceResult<ComInit> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        // S_FALSE also takes a reference that must be released.
        if hr.is_ok() {
            Ok(ComInit::Initialized)
        } else if hr == RPC_E_CHANGED_MODE {
            Ok(ComInit::AlreadyInitialized)
        } else {
            Err(EloquenceError::audio_device(format!(
                "CoInitializeEx failed: {hr:?}"
            )))
        }
    }

    fn uninitialize(&self) {
        unsafe { CoUninitialize() };
    }

    fn enumerator(&self) -> EloquenceResult<Box<dyn DeviceEnumerator>> {
        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
                .map_err(|e| device_error("Failed to create device enumerator", &e))?;
        Ok(Box::new(WasapiEnumerator(enumerator)))
    }
}

struct WasapiEnumerator(IMMDeviceEnumerator);

impl DeviceEnumerator for WasapiEnumerator {
    fn default_endpoint(&self) -> EloquenceResult<Box<dyn Endpoint>> {
        let device = unsafe { self.0.GetDefaultAudioEndpoint(eRender, eConsole) }
            .map_err(|e| device_error("No default render endpoint", &e))?;
        Ok(Box::new(WasapiEndpoint(device)))
    }

    fn endpoint(&self, id: &str) -> EloquenceResult<Box<dyn Endpoint>> {
        let id = HSTRING::from(id);
        let device = unsafe { self.0.GetDevice(&id) }
            .map_err(|e| device_error("Render endpoint not found", &e))?;
        Ok(Box::new(WasapiEndpoint(device)))
    }

    fn endpoint_by_name(&self, name: &str) -> EloquenceResult<Box<dyn Endpoint>> {
        let devices = unsafe { self.0.EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE) }
            .map_err(|e| device_error("Failed to enumerate render endpoints", &e))?;
        let count = unsafe { devices.GetCount() }
            .map_err(|e| device_error("Failed to count render endpoints", &e))?;
        for index in 0..count {
            let Ok(device) = (unsafe { devices.Item(index) }) else {
                continue;
            };
            // Endpoints without a readable name are skipped.
            let Some(friendly_name) = friendly_name(&device) else {
                continue;
            };
            if device_name_matches(&friendly_name, name) {
                return Ok(Box::new(WasapiEndpoint(device)));
            }
        }
        Err(EloquenceError::audio_device(format!(
            "No active render endpoint named '{name}'"
        )))
    }
}

fn friendly_name(device: &IMMDevice) -> Option<String> {
    let store = unsafe { device.OpenPropertyStore(STGM_READ) }.ok()?;
    let value = unsafe { store.GetValue(&PKEY_Device_FriendlyName) }.ok()?;
    Some(value.to_string())
}

struct WasapiEndpoint(IMMDevice);

impl Endpoint for WasapiEndpoint {
    fn activate(&self) -> EloquenceResult<Box<dyn AudioClient>> {
        let client: IAudioClient = unsafe { self.0.Activate(CLSCTX_ALL, None) }
            .map_err(|e| device_error("Failed to activate audio client", &e))?;
        Ok(Box::new(WasapiClient(client)))
    }
}

struct WasapiClient(IAudioClient);

impl AudioClient for WasapiClient {
    fn mix_sample_rate(&self) -> EloquenceResult<u32> {
        let format = unsafe { self.0.GetMixFormat() }
            .map_err(|e| device_error("Failed to read mix format", &e))?;
        if format.is_null() {
            return Err(EloquenceError::audio_device("Mix format was null"));
        }
        unsafe {
            let rate = (*format).nSamplesPerSec;
            CoTaskMemFree(Some(format.cast_const().cast()));
            Ok(rate)
        }
    }
}
