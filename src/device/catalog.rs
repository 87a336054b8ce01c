//! Device listing and capability description.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::api::DeckLinkApi;
use super::error::{CaptureError, Result};
use super::guard::Acquired;
use super::modes::DisplayModeCatalog;
use super::types::{
    DeviceAttributes, DisplayMode, InputFlags, PixelFormat, VideoConnections,
};

/// A card found by [`DeviceCatalog::list_devices`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub index: usize,
    pub model_name: String,
}

/// A display mode together with the pixel formats it can run in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeCapability {
    pub mode: DisplayMode,
    pub pixel_formats: Vec<PixelFormat>,
}

/// Position of a device within a multi-port card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubDevice {
    pub index: i64,
    pub count: i64,
}

/// Everything the driver reports about one card.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub index: usize,
    pub model_name: String,
    pub attributes: DeviceAttributes,
    pub input_modes: Vec<ModeCapability>,
    pub output_modes: Vec<ModeCapability>,
    pub input_connections: VideoConnections,
    pub output_connections: VideoConnections,
    pub sub_device: SubDevice,
}

/// Select the device at `index`, releasing every device reference passed
/// on the way and the iterator itself.
pub(crate) fn select_device<A: DeckLinkApi + ?Sized>(
    api: &Arc<A>,
    index: usize,
) -> Result<Acquired<A>> {
    let iterator = api
        .create_iterator()
        .map_err(CaptureError::DriverUnavailable)?;
    let iterator = Acquired::interface(api, iterator);
    for position in 0..=index {
        let device = match api.next_device(iterator.handle()) {
            Ok(Some(handle)) => Acquired::interface(api, handle),
            Ok(None) => return Err(CaptureError::DeviceNotFound(index)),
            Err(e) => {
                debug!("Device iterator failed at {position}: {e}");
                return Err(CaptureError::DeviceNotFound(index));
            }
        };
        if position == index {
            return Ok(device);
        }
    }
    Err(CaptureError::DeviceNotFound(index))
}

/// Read-only view of the cards installed on this machine.
pub struct DeviceCatalog<A: DeckLinkApi + ?Sized> {
    api: Arc<A>,
}

impl<A: DeckLinkApi + ?Sized> DeviceCatalog<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Every device, in driver order.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let iterator = self
            .api
            .create_iterator()
            .map_err(CaptureError::DriverUnavailable)?;
        let iterator = Acquired::interface(&self.api, iterator);
        let mut devices = Vec::new();
        loop {
            let device = match self.api.next_device(iterator.handle()) {
                Ok(Some(handle)) => Acquired::interface(&self.api, handle),
                Ok(None) => break,
                Err(e) => {
                    warn!("Device enumeration stopped early: {e}");
                    break;
                }
            };
            let model_name = self
                .api
                .model_name(device.handle())
                .unwrap_or_else(|e| {
                    debug!("No model name for device {}: {e}", devices.len());
                    "Unknown".to_string()
                });
            devices.push(DeviceInfo {
                index: devices.len(),
                model_name,
            });
        }
        debug!("Found {} capture device(s)", devices.len());
        Ok(devices)
    }

    /// Attributes, connectors and per-mode pixel format support of one card.
    pub fn describe_capabilities(&self, index: usize) -> Result<DeviceCapabilities> {
        let device = select_device(&self.api, index)?;
        let model_name = self
            .api
            .model_name(device.handle())
            .unwrap_or_else(|_| "Unknown".to_string());
        let attributes = self.api.attributes(device.handle()).unwrap_or_else(|e| {
            warn!("Could not read attributes of device {index}: {e}");
            DeviceAttributes::default()
        });

        let input_modes = match self.api.query_input(device.handle()) {
            Ok(input) => {
                let input = Acquired::interface(&self.api, input);
                self.mode_capabilities(&input)?
            }
            Err(e) => {
                debug!("Device {index} has no input interface: {e}");
                Vec::new()
            }
        };
        let output_modes = match self.api.query_output(device.handle()) {
            Ok(output) => {
                let output = Acquired::interface(&self.api, output);
                self.mode_capabilities(&output)?
            }
            Err(e) => {
                debug!("Device {index} has no output interface: {e}");
                Vec::new()
            }
        };

        Ok(DeviceCapabilities {
            index,
            model_name,
            input_connections: attributes.input_connections,
            output_connections: attributes.output_connections,
            sub_device: SubDevice {
                index: attributes.sub_device_index,
                count: attributes.sub_device_count,
            },
            attributes,
            input_modes,
            output_modes,
        })
    }

    fn mode_capabilities(&self, io: &Acquired<A>) -> Result<Vec<ModeCapability>> {
        let catalog = DisplayModeCatalog::new(&self.api, io.handle());
        let modes = catalog.modes()?;
        Ok(modes
            .into_iter()
            .map(|mode| {
                let pixel_formats = PixelFormat::ALL
                    .into_iter()
                    .filter(|&pf| {
                        catalog
                            .supports(&mode, pf, InputFlags::empty())
                            .is_ok_and(|support| support.is_supported())
                    })
                    .collect();
                ModeCapability {
                    mode,
                    pixel_formats,
                }
            })
            .collect())
    }

    /// Map each port of a multi-port card to its device index.
    ///
    /// Returns `sub_device_count` entries; entry `i` is the device index of
    /// sub-device `i`, or `None` when no such port was found.
    pub fn find_sub_devices(&self, sub_device_count: i64) -> Result<Vec<Option<usize>>> {
        let slots = usize::try_from(sub_device_count).unwrap_or(0);
        let mut ports = vec![None; slots];
        for device in self.list_devices()? {
            let handle = select_device(&self.api, device.index)?;
            let Ok(attributes) = self.api.attributes(handle.handle()) else {
                continue;
            };
            if attributes.sub_device_count != sub_device_count {
                continue;
            }
            let slot = usize::try_from(attributes.sub_device_index)
                .ok()
                .and_then(|i| ports.get_mut(i));
            match slot {
                Some(entry) if entry.is_none() => *entry = Some(device.index),
                Some(entry) => warn!(
                    "Sub-device {} claimed twice ({entry:?} and {})",
                    attributes.sub_device_index, device.index
                ),
                None => warn!(
                    "Device {} reports sub-device index {} outside 0..{sub_device_count}",
                    device.index, attributes.sub_device_index
                ),
            }
        }
        Ok(ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::api::DriverError;
    use crate::device::mock::{MockDeckLink, MockDevice};
    use crate::device::types::DisplayModeId;

    fn port(model: &str, index: i64, count: i64) -> MockDevice {
        MockDevice::new(model).with_attributes(DeviceAttributes {
            sub_device_index: index,
            sub_device_count: count,
            ..DeviceAttributes::default()
        })
    }

    #[test]
    fn lists_devices_in_order() {
        let api = Arc::new(MockDeckLink::new().with_devices(3));
        let devices = DeviceCatalog::new(api.clone()).list_devices().unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.model_name.as_str()).collect();
        assert_eq!(names, ["Mock Capture 1", "Mock Capture 2", "Mock Capture 3"]);
        assert_eq!(devices[2].index, 2);
        assert_eq!(api.outstanding_references(), 0);
    }

    #[test]
    fn listing_without_driver_fails() {
        let api = Arc::new(MockDeckLink::new().without_driver());
        let err = DeviceCatalog::new(api).list_devices().unwrap_err();
        assert!(matches!(err, CaptureError::DriverUnavailable(_)));
    }

    #[test]
    fn describes_output_modes_with_formats() {
        let api = Arc::new(MockDeckLink::new().with_device(
            MockDevice::new("Studio")
                .with_pixel_formats(DisplayModeId::NTSC, &[PixelFormat::Yuv8, PixelFormat::Yuv10]),
        ));
        let caps = DeviceCatalog::new(api.clone()).describe_capabilities(0).unwrap();
        assert_eq!(caps.model_name, "Studio");
        let ntsc = caps
            .output_modes
            .iter()
            .find(|m| m.mode.id == DisplayModeId::NTSC)
            .unwrap();
        assert_eq!(ntsc.pixel_formats, vec![PixelFormat::Yuv8, PixelFormat::Yuv10]);
        let pal = caps
            .output_modes
            .iter()
            .find(|m| m.mode.id == DisplayModeId::PAL)
            .unwrap();
        assert_eq!(pal.pixel_formats, PixelFormat::ALL.to_vec());
        assert_eq!(
            caps.input_connections,
            VideoConnections::SDI | VideoConnections::HDMI
        );
        assert_eq!(api.outstanding_references(), 0);
    }

    #[test]
    fn capture_only_card_has_no_output_modes() {
        let api = Arc::new(MockDeckLink::new().with_device(MockDevice::new("Recorder").without_output()));
        let caps = DeviceCatalog::new(api).describe_capabilities(0).unwrap();
        assert!(caps.output_modes.is_empty());
        assert!(!caps.input_modes.is_empty());
    }

    #[test]
    fn describing_missing_device_fails() {
        let api = Arc::new(MockDeckLink::new().with_devices(1));
        let err = DeviceCatalog::new(api.clone())
            .describe_capabilities(4)
            .unwrap_err();
        assert_eq!(err, CaptureError::DeviceNotFound(4));
        assert_eq!(api.outstanding_references(), 0);
    }

    #[test]
    fn capabilities_serialise_camel_case() {
        let api = Arc::new(MockDeckLink::new().with_devices(1));
        let caps = DeviceCatalog::new(api).describe_capabilities(0).unwrap();
        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["modelName"], "Mock Capture 1");
        assert_eq!(json["subDevice"]["count"], 1);
        assert_eq!(json["inputConnections"], serde_json::json!(["SDI", "HDMI"]));
        assert_eq!(json["outputModes"][0]["mode"]["id"], "ntsc");
    }

    #[test]
    fn maps_sub_devices_of_a_quad_card() {
        let api = Arc::new(
            MockDeckLink::new()
                .with_device(MockDevice::new("Single"))
                .with_device(port("Quad (3)", 2, 4))
                .with_device(port("Quad (1)", 0, 4))
                .with_device(port("Quad (2)", 1, 4)),
        );
        let ports = DeviceCatalog::new(api.clone()).find_sub_devices(4).unwrap();
        assert_eq!(ports, vec![Some(2), Some(3), Some(1), None]);
        assert_eq!(api.outstanding_references(), 0);
    }

    #[test]
    fn sub_device_attribute_errors_skip_the_device() {
        let api = Arc::new(
            MockDeckLink::new()
                .with_device(port("Duo (1)", 0, 2))
                .with_device(port("Duo (2)", 1, 2))
                .with_error("attributes", DriverError::FAIL),
        );
        let ports = DeviceCatalog::new(api).find_sub_devices(2).unwrap();
        assert_eq!(ports, vec![None, Some(1)]);
    }
}
