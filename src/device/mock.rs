//! Mock capture driver for testing without cards or vendor libraries.
//!
//! Uses a builder pattern to configure devices, display modes, per-mode
//! pixel formats and error injection. Frames and format changes are pushed
//! through the registered callback on the caller's thread, standing in for
//! the driver's capture thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::api::{DeckLinkApi, DriverError, DriverResult, InputCallback, InterfaceHandle};
use super::types::{
    DetectedSignalFlags, DeviceAttributes, DisplayMode, DisplayModeId, FormatChangedEvents,
    InputFlags, ModeSupport, PixelFormat, RawFrame, VideoConnections,
};

/// A display mode offered by a mock interface, with the formats it accepts.
#[derive(Debug, Clone)]
struct MockMode {
    mode: DisplayMode,
    formats: Vec<PixelFormat>,
}

/// A simulated capture card.
#[derive(Debug, Clone)]
pub struct MockDevice {
    model: String,
    attributes: DeviceAttributes,
    input_modes: Option<Vec<MockMode>>,
    output_modes: Option<Vec<MockMode>>,
}

impl MockDevice {
    /// A card with one SDI/HDMI input and output offering every standard
    /// mode in every pixel format.
    pub fn new(model: &str) -> Self {
        let modes: Vec<MockMode> = DisplayMode::standard_modes()
            .into_iter()
            .map(|mode| MockMode {
                mode,
                formats: PixelFormat::ALL.to_vec(),
            })
            .collect();
        Self {
            model: model.to_string(),
            attributes: DeviceAttributes {
                serial_port_name: None,
                sub_device_count: 1,
                sub_device_index: 0,
                max_audio_channels: 16,
                supports_input_format_detection: true,
                supports_internal_keying: false,
                supports_external_keying: false,
                supports_hd_keying: false,
                input_connections: VideoConnections::SDI | VideoConnections::HDMI,
                output_connections: VideoConnections::SDI | VideoConnections::HDMI,
            },
            input_modes: Some(modes.clone()),
            output_modes: Some(modes),
        }
    }

    /// Replace the input modes; each accepts every pixel format.
    pub fn with_modes(mut self, modes: Vec<DisplayMode>) -> Self {
        self.input_modes = Some(
            modes
                .into_iter()
                .map(|mode| MockMode {
                    mode,
                    formats: PixelFormat::ALL.to_vec(),
                })
                .collect(),
        );
        self
    }

    /// Restrict the pixel formats a mode accepts on both interfaces.
    pub fn with_pixel_formats(mut self, mode: DisplayModeId, formats: &[PixelFormat]) -> Self {
        for list in [&mut self.input_modes, &mut self.output_modes]
            .into_iter()
            .flatten()
        {
            for entry in list.iter_mut().filter(|m| m.mode.id == mode) {
                entry.formats = formats.to_vec();
            }
        }
        self
    }

    pub fn with_attributes(mut self, attributes: DeviceAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Card without an input interface (playback only).
    pub fn without_input(mut self) -> Self {
        self.input_modes = None;
        self
    }

    /// Card without an output interface (capture only).
    pub fn without_output(mut self) -> Self {
        self.output_modes = None;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum HandleKind {
    DeviceIterator { next: usize },
    Device(usize),
    Input(usize),
    Output(usize),
    ModeIterator { device: usize, output: bool, next: usize },
}

#[derive(Default)]
struct DeviceRuntime {
    callback: Option<Arc<dyn InputCallback>>,
    enabled: Option<(DisplayModeId, PixelFormat, InputFlags)>,
    streaming: bool,
}

/// Configurable error injection for a specific operation.
#[derive(Debug, Clone)]
struct ErrorInjection {
    operation: &'static str,
    error: DriverError,
}

struct MockState {
    driver_installed: bool,
    devices: Vec<MockDevice>,
    runtime: Vec<DeviceRuntime>,
    handles: HashMap<u64, HandleKind>,
    next_handle: u64,
    error_injections: Vec<ErrorInjection>,
}

/// Mock driver implementation.
///
/// All state is behind a `Mutex` so the mock satisfies `Send + Sync`.
/// The lock is never held while a callback runs, so callbacks may call
/// back into the mock.
pub struct MockDeckLink {
    state: Mutex<MockState>,
}

impl Default for MockDeckLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeckLink {
    /// Create an installed driver with no devices.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                driver_installed: true,
                devices: Vec::new(),
                runtime: Vec::new(),
                handles: HashMap::new(),
                next_handle: 1,
                error_injections: Vec::new(),
            }),
        }
    }

    /// Simulate a machine where the driver is not installed.
    pub fn without_driver(self) -> Self {
        self.state.lock().driver_installed = false;
        self
    }

    pub fn with_device(self, device: MockDevice) -> Self {
        {
            let mut state = self.state.lock();
            state.devices.push(device);
            state.runtime.push(DeviceRuntime::default());
        }
        self
    }

    /// Add N devices with auto-generated model names.
    pub fn with_devices(self, count: usize) -> Self {
        let mut result = self;
        for i in 0..count {
            result = result.with_device(MockDevice::new(&format!("Mock Capture {}", i + 1)));
        }
        result
    }

    /// Inject an error for the next call of a specific operation.
    ///
    /// Operation names match the `DeckLinkApi` method names, e.g.
    /// `"create_iterator"`, `"query_input"`, `"enable_video_input"`,
    /// `"start_streams"`.
    pub fn with_error(self, operation: &'static str, error: DriverError) -> Self {
        self.inject_error(operation, error);
        self
    }

    /// Inject an error on an already-built mock.
    pub fn inject_error(&self, operation: &'static str, error: DriverError) {
        self.state
            .lock()
            .error_injections
            .push(ErrorInjection { operation, error });
    }

    /// Number of handles handed out and not yet released.
    pub fn outstanding_references(&self) -> usize {
        self.state.lock().handles.len()
    }

    pub fn is_streaming(&self, device: usize) -> bool {
        self.state
            .lock()
            .runtime
            .get(device)
            .is_some_and(|rt| rt.streaming)
    }

    /// The mode video input is currently enabled with, if any.
    pub fn enabled_mode(&self, device: usize) -> Option<DisplayModeId> {
        self.state
            .lock()
            .runtime
            .get(device)
            .and_then(|rt| rt.enabled.map(|(mode, _, _)| mode))
    }

    /// The flags video input is currently enabled with, if any.
    pub fn enabled_flags(&self, device: usize) -> Option<InputFlags> {
        self.state
            .lock()
            .runtime
            .get(device)
            .and_then(|rt| rt.enabled.map(|(_, _, flags)| flags))
    }

    pub fn has_callback(&self, device: usize) -> bool {
        self.state
            .lock()
            .runtime
            .get(device)
            .is_some_and(|rt| rt.callback.is_some())
    }

    /// Push a frame through the device's callback, as the driver's capture
    /// thread would. Returns `false` when the device is not streaming.
    pub fn deliver_frame(&self, device: usize, frame: &RawFrame<'_>) -> bool {
        let callback = {
            let state = self.state.lock();
            match state.runtime.get(device) {
                Some(rt) if rt.streaming => rt.callback.clone(),
                _ => None,
            }
        };
        match callback {
            Some(callback) => {
                callback.video_input_frame_arrived(frame);
                true
            }
            None => false,
        }
    }

    /// Signal that the input now carries `mode`. Only delivered while
    /// streaming with format detection enabled.
    pub fn change_format(&self, device: usize, mode: DisplayModeId) -> bool {
        let delivery = {
            let state = self.state.lock();
            let Some(rt) = state.runtime.get(device) else {
                return false;
            };
            let detecting = rt
                .enabled
                .is_some_and(|(_, _, flags)| flags.contains(InputFlags::ENABLE_FORMAT_DETECTION));
            let new_mode = state
                .devices
                .get(device)
                .and_then(|d| d.input_modes.as_ref())
                .and_then(|modes| modes.iter().find(|m| m.mode.id == mode))
                .map(|m| m.mode.clone());
            match (rt.streaming && detecting, rt.callback.clone(), new_mode) {
                (true, Some(callback), Some(new_mode)) => Some((callback, new_mode)),
                _ => None,
            }
        };
        match delivery {
            Some((callback, new_mode)) => {
                callback.video_input_format_changed(
                    FormatChangedEvents::DISPLAY_MODE_CHANGED,
                    &new_mode,
                    DetectedSignalFlags::YCBCR_422,
                );
                true
            }
            None => false,
        }
    }
}

impl MockState {
    /// Check for injected errors for the given operation.
    fn check_error(&mut self, operation: &str) -> DriverResult<()> {
        if let Some(pos) = self
            .error_injections
            .iter()
            .position(|e| e.operation == operation)
        {
            let injection = self.error_injections.remove(pos);
            return Err(injection.error);
        }
        Ok(())
    }

    fn allocate(&mut self, kind: HandleKind) -> InterfaceHandle {
        let id = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(id, kind);
        InterfaceHandle(id)
    }

    fn kind(&self, handle: InterfaceHandle) -> DriverResult<HandleKind> {
        self.handles
            .get(&handle.0)
            .copied()
            .ok_or(DriverError::INVALID_ARG)
    }

    fn device_of(&self, handle: InterfaceHandle) -> DriverResult<usize> {
        match self.kind(handle)? {
            HandleKind::Device(index) | HandleKind::Input(index) | HandleKind::Output(index) => {
                Ok(index)
            }
            _ => Err(DriverError::INVALID_ARG),
        }
    }

    fn input_of(&self, handle: InterfaceHandle) -> DriverResult<usize> {
        match self.kind(handle)? {
            HandleKind::Input(index) => Ok(index),
            _ => Err(DriverError::NO_INTERFACE),
        }
    }

    fn modes_of(&self, handle: InterfaceHandle) -> DriverResult<&[MockMode]> {
        let (index, output) = match self.kind(handle)? {
            HandleKind::Input(index) => (index, false),
            HandleKind::Output(index) => (index, true),
            _ => return Err(DriverError::NO_INTERFACE),
        };
        let device = self.devices.get(index).ok_or(DriverError::INVALID_ARG)?;
        let modes = if output {
            &device.output_modes
        } else {
            &device.input_modes
        };
        modes.as_deref().ok_or(DriverError::NO_INTERFACE)
    }

    fn runtime_mut(&mut self, index: usize) -> DriverResult<&mut DeviceRuntime> {
        self.runtime.get_mut(index).ok_or(DriverError::INVALID_ARG)
    }
}

impl DeckLinkApi for MockDeckLink {
    fn create_iterator(&self) -> DriverResult<InterfaceHandle> {
        let mut state = self.state.lock();
        state.check_error("create_iterator")?;
        if !state.driver_installed {
            return Err(DriverError::NO_INTERFACE);
        }
        Ok(state.allocate(HandleKind::DeviceIterator { next: 0 }))
    }

    fn next_device(&self, iterator: InterfaceHandle) -> DriverResult<Option<InterfaceHandle>> {
        let mut state = self.state.lock();
        state.check_error("next_device")?;
        let HandleKind::DeviceIterator { next } = state.kind(iterator)? else {
            return Err(DriverError::INVALID_ARG);
        };
        if next >= state.devices.len() {
            return Ok(None);
        }
        state
            .handles
            .insert(iterator.0, HandleKind::DeviceIterator { next: next + 1 });
        Ok(Some(state.allocate(HandleKind::Device(next))))
    }

    fn model_name(&self, device: InterfaceHandle) -> DriverResult<String> {
        let mut state = self.state.lock();
        state.check_error("model_name")?;
        let index = state.device_of(device)?;
        Ok(state.devices[index].model.clone())
    }

    fn attributes(&self, device: InterfaceHandle) -> DriverResult<DeviceAttributes> {
        let mut state = self.state.lock();
        state.check_error("attributes")?;
        let index = state.device_of(device)?;
        Ok(state.devices[index].attributes.clone())
    }

    fn query_input(&self, device: InterfaceHandle) -> DriverResult<InterfaceHandle> {
        let mut state = self.state.lock();
        state.check_error("query_input")?;
        let index = state.device_of(device)?;
        if state.devices[index].input_modes.is_none() {
            return Err(DriverError::NO_INTERFACE);
        }
        Ok(state.allocate(HandleKind::Input(index)))
    }

    fn query_output(&self, device: InterfaceHandle) -> DriverResult<InterfaceHandle> {
        let mut state = self.state.lock();
        state.check_error("query_output")?;
        let index = state.device_of(device)?;
        if state.devices[index].output_modes.is_none() {
            return Err(DriverError::NO_INTERFACE);
        }
        Ok(state.allocate(HandleKind::Output(index)))
    }

    fn display_mode_iterator(&self, io: InterfaceHandle) -> DriverResult<InterfaceHandle> {
        let mut state = self.state.lock();
        state.check_error("display_mode_iterator")?;
        let (device, output) = match state.kind(io)? {
            HandleKind::Input(index) => (index, false),
            HandleKind::Output(index) => (index, true),
            _ => return Err(DriverError::NO_INTERFACE),
        };
        Ok(state.allocate(HandleKind::ModeIterator {
            device,
            output,
            next: 0,
        }))
    }

    fn next_display_mode(&self, iterator: InterfaceHandle) -> DriverResult<Option<DisplayMode>> {
        let mut state = self.state.lock();
        state.check_error("next_display_mode")?;
        let HandleKind::ModeIterator {
            device,
            output,
            next,
        } = state.kind(iterator)?
        else {
            return Err(DriverError::INVALID_ARG);
        };
        let entry = state.devices.get(device).and_then(|d| {
            let modes = if output { &d.output_modes } else { &d.input_modes };
            modes.as_ref().and_then(|m| m.get(next)).map(|m| m.mode.clone())
        });
        if entry.is_some() {
            state.handles.insert(
                iterator.0,
                HandleKind::ModeIterator {
                    device,
                    output,
                    next: next + 1,
                },
            );
        }
        Ok(entry)
    }

    fn supports_video_mode(
        &self,
        io: InterfaceHandle,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        flags: InputFlags,
    ) -> DriverResult<ModeSupport> {
        let mut state = self.state.lock();
        state.check_error("supports_video_mode")?;
        let Some(entry) = state.modes_of(io)?.iter().find(|m| m.mode.id == mode) else {
            return Ok(ModeSupport::NotSupported);
        };
        if !entry.formats.contains(&pixel_format) {
            return Ok(ModeSupport::NotSupported);
        }
        if flags.contains(InputFlags::DUAL_STREAM_3D) && !entry.mode.supports_3d() {
            return Ok(ModeSupport::NotSupported);
        }
        Ok(ModeSupport::Supported)
    }

    fn set_callback(
        &self,
        input: InterfaceHandle,
        callback: Option<Arc<dyn InputCallback>>,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check_error("set_callback")?;
        let index = state.input_of(input)?;
        state.runtime_mut(index)?.callback = callback;
        Ok(())
    }

    fn enable_video_input(
        &self,
        input: InterfaceHandle,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        flags: InputFlags,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check_error("enable_video_input")?;
        let index = state.input_of(input)?;
        if !state.modes_of(input)?.iter().any(|m| m.mode.id == mode) {
            return Err(DriverError::INVALID_ARG);
        }
        let rt = state.runtime_mut(index)?;
        if rt.streaming {
            return Err(DriverError::ACCESS_DENIED);
        }
        rt.enabled = Some((mode, pixel_format, flags));
        Ok(())
    }

    fn disable_video_input(&self, input: InterfaceHandle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check_error("disable_video_input")?;
        let index = state.input_of(input)?;
        let rt = state.runtime_mut(index)?;
        rt.enabled = None;
        rt.streaming = false;
        Ok(())
    }

    fn start_streams(&self, input: InterfaceHandle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check_error("start_streams")?;
        let index = state.input_of(input)?;
        let rt = state.runtime_mut(index)?;
        if rt.enabled.is_none() {
            return Err(DriverError::ACCESS_DENIED);
        }
        rt.streaming = true;
        Ok(())
    }

    fn stop_streams(&self, input: InterfaceHandle) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.check_error("stop_streams")?;
        let index = state.input_of(input)?;
        state.runtime_mut(index)?.streaming = false;
        Ok(())
    }

    fn release(&self, handle: InterfaceHandle) {
        self.state.lock().handles.remove(&handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCallback {
        frames: AtomicUsize,
        format_changes: AtomicUsize,
    }

    impl InputCallback for CountingCallback {
        fn video_input_frame_arrived(&self, _frame: &RawFrame<'_>) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }

        fn video_input_format_changed(
            &self,
            _events: FormatChangedEvents,
            _mode: &DisplayMode,
            _detected: DetectedSignalFlags,
        ) {
            self.format_changes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn open_input(api: &MockDeckLink, index: usize) -> (InterfaceHandle, InterfaceHandle) {
        let iterator = api.create_iterator().unwrap();
        let mut device = None;
        for _ in 0..=index {
            if let Some(old) = device.take() {
                api.release(old);
            }
            device = api.next_device(iterator).unwrap();
        }
        api.release(iterator);
        let device = device.unwrap();
        let input = api.query_input(device).unwrap();
        (device, input)
    }

    #[test]
    fn iterates_devices_then_ends() {
        let api = MockDeckLink::new().with_devices(2);
        let iterator = api.create_iterator().unwrap();
        let a = api.next_device(iterator).unwrap().unwrap();
        let b = api.next_device(iterator).unwrap().unwrap();
        assert!(api.next_device(iterator).unwrap().is_none());
        assert_eq!(api.model_name(a).unwrap(), "Mock Capture 1");
        assert_eq!(api.model_name(b).unwrap(), "Mock Capture 2");
        assert_eq!(api.outstanding_references(), 3);
        for handle in [a, b, iterator] {
            api.release(handle);
        }
        assert_eq!(api.outstanding_references(), 0);
    }

    #[test]
    fn missing_driver_fails_iterator() {
        let api = MockDeckLink::new().with_devices(1).without_driver();
        assert_eq!(api.create_iterator(), Err(DriverError::NO_INTERFACE));
    }

    #[test]
    fn injected_error_fires_once() {
        let api = MockDeckLink::new()
            .with_devices(1)
            .with_error("create_iterator", DriverError::FAIL);
        assert_eq!(api.create_iterator(), Err(DriverError::FAIL));
        let iterator = api.create_iterator().unwrap();
        api.release(iterator);
    }

    #[test]
    fn mode_iterator_lists_configured_modes() {
        let modes = vec![
            DisplayMode::standard(DisplayModeId::NTSC).unwrap(),
            DisplayMode::standard(DisplayModeId::PAL).unwrap(),
        ];
        let api = MockDeckLink::new().with_device(MockDevice::new("Duo").with_modes(modes));
        let (device, input) = open_input(&api, 0);
        let iterator = api.display_mode_iterator(input).unwrap();
        let mut ids = Vec::new();
        while let Some(mode) = api.next_display_mode(iterator).unwrap() {
            ids.push(mode.id);
        }
        assert_eq!(ids, vec![DisplayModeId::NTSC, DisplayModeId::PAL]);
        for handle in [iterator, input, device] {
            api.release(handle);
        }
        assert_eq!(api.outstanding_references(), 0);
    }

    #[test]
    fn supports_video_mode_respects_formats_and_stereo() {
        let api = MockDeckLink::new().with_device(
            MockDevice::new("Mini").with_pixel_formats(DisplayModeId::PAL, &[PixelFormat::Yuv8]),
        );
        let (_, input) = open_input(&api, 0);
        let check = |mode, pf, flags| api.supports_video_mode(input, mode, pf, flags).unwrap();
        assert!(check(DisplayModeId::PAL, PixelFormat::Yuv8, InputFlags::empty()).is_supported());
        assert!(!check(DisplayModeId::PAL, PixelFormat::Bgra8, InputFlags::empty()).is_supported());
        assert!(!check(DisplayModeId::NTSC, PixelFormat::Yuv8, InputFlags::DUAL_STREAM_3D)
            .is_supported());
        assert!(
            check(DisplayModeId::HD1080I50, PixelFormat::Yuv8, InputFlags::DUAL_STREAM_3D)
                .is_supported()
        );
    }

    #[test]
    fn device_without_input_has_no_input_interface() {
        let api = MockDeckLink::new().with_device(MockDevice::new("Playback").without_input());
        let iterator = api.create_iterator().unwrap();
        let device = api.next_device(iterator).unwrap().unwrap();
        assert_eq!(api.query_input(device), Err(DriverError::NO_INTERFACE));
        assert!(api.query_output(device).is_ok());
    }

    #[test]
    fn enable_is_refused_while_streaming() {
        let api = MockDeckLink::new().with_devices(1);
        let (_, input) = open_input(&api, 0);
        assert_eq!(api.start_streams(input), Err(DriverError::ACCESS_DENIED));
        api.enable_video_input(input, DisplayModeId::NTSC, PixelFormat::Yuv8, InputFlags::empty())
            .unwrap();
        api.start_streams(input).unwrap();
        assert_eq!(
            api.enable_video_input(input, DisplayModeId::PAL, PixelFormat::Yuv8, InputFlags::empty()),
            Err(DriverError::ACCESS_DENIED)
        );
        api.stop_streams(input).unwrap();
        api.enable_video_input(input, DisplayModeId::PAL, PixelFormat::Yuv8, InputFlags::empty())
            .unwrap();
        assert_eq!(api.enabled_mode(0), Some(DisplayModeId::PAL));
    }

    #[test]
    fn frames_are_delivered_only_while_streaming() {
        let api = MockDeckLink::new().with_devices(1);
        let (_, input) = open_input(&api, 0);
        let callback = Arc::new(CountingCallback::default());
        api.set_callback(input, Some(callback.clone())).unwrap();

        let bytes = [0u8; 4];
        let frame = RawFrame::new(2, 1, 4, &bytes);
        assert!(!api.deliver_frame(0, &frame));

        api.enable_video_input(
            input,
            DisplayModeId::NTSC,
            PixelFormat::Yuv8,
            InputFlags::ENABLE_FORMAT_DETECTION,
        )
        .unwrap();
        api.start_streams(input).unwrap();
        assert!(api.deliver_frame(0, &frame));
        assert!(api.change_format(0, DisplayModeId::PAL));
        assert!(!api.change_format(0, DisplayModeId::from_fourcc(b"none")));
        assert_eq!(callback.frames.load(Ordering::SeqCst), 1);
        assert_eq!(callback.format_changes.load(Ordering::SeqCst), 1);

        api.set_callback(input, None).unwrap();
        assert!(!api.has_callback(0));
        assert!(!api.deliver_frame(0, &frame));
    }

    #[test]
    fn format_change_needs_detection_enabled() {
        let api = MockDeckLink::new().with_devices(1);
        let (_, input) = open_input(&api, 0);
        api.set_callback(input, Some(Arc::new(CountingCallback::default())))
            .unwrap();
        api.enable_video_input(input, DisplayModeId::NTSC, PixelFormat::Yuv8, InputFlags::empty())
            .unwrap();
        api.start_streams(input).unwrap();
        assert!(!api.change_format(0, DisplayModeId::PAL));
    }
}
