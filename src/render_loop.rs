use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::{
    error::SetupError,
    pipeline::{CameraConstraints, DetectorLoader, FrameSource, HandLandmarker},
    scene::{SceneContext, TickOutcome},
    types::{DemoVariant, LoopState, PresentedFrame},
};

pub const DEFAULT_TICK_RATE: u32 = 60;

/// How long dropping a [`LoopHandle`] waits for the thread before detaching it.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub variant: DemoVariant,
    pub constraints: CameraConstraints,
    pub tick_interval: Duration,
}

impl LoopConfig {
    pub fn tick_interval_for(rate: u32) -> Duration {
        Duration::from_secs_f64(1.0 / rate.max(1) as f64)
    }
}

/// Receives what the loop produces each tick.
pub trait Presenter {
    fn state_changed(&mut self, state: LoopState);
    fn present(&mut self, frame: PresentedFrame);
}

/// Receives setup failures. Called at most once per loop.
pub trait Notifier {
    fn setup_failed(&mut self, error: &SetupError);
}

#[derive(Debug)]
pub enum LoopEvent {
    State(LoopState),
    SetupFailed(SetupError),
}

/// Forwards loop output to the window thread. Frames go through a one-slot
/// channel where a newer frame evicts an unread older one.
#[derive(Clone)]
pub struct ChannelPresenter {
    events: Sender<LoopEvent>,
    frames: Sender<PresentedFrame>,
    evict: Receiver<PresentedFrame>,
}

impl ChannelPresenter {
    pub fn new(events: Sender<LoopEvent>, frames: Sender<PresentedFrame>, evict: Receiver<PresentedFrame>) -> Self {
        Self {
            events,
            frames,
            evict,
        }
    }
}

impl Presenter for ChannelPresenter {
    fn state_changed(&mut self, state: LoopState) {
        let _ = self.events.send(LoopEvent::State(state));
    }

    fn present(&mut self, frame: PresentedFrame) {
        let mut pending = frame;
        loop {
            match self.frames.try_send(pending) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.evict.try_recv();
                    pending = back;
                }
            }
        }
    }
}

impl Notifier for ChannelPresenter {
    fn setup_failed(&mut self, error: &SetupError) {
        let _ = self.events.send(LoopEvent::SetupFailed(error.clone()));
    }
}

/// Fixed-rate scheduling that delays rather than stacks: after an overrun the
/// next tick starts immediately and the schedule restarts from there.
#[derive(Debug)]
pub(crate) struct TickPacer {
    interval: Duration,
    next: Option<Instant>,
}

impl TickPacer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    /// How long to wait at `now` before the next tick may start.
    pub(crate) fn delay_at(&mut self, now: Instant) -> Duration {
        let deadline = match self.next {
            Some(deadline) if deadline > now => deadline,
            _ => now,
        };
        self.next = Some(deadline + self.interval);
        deadline - now
    }
}

/// The per-frame pipeline: pull a frame, look for a hand, react, present.
pub struct RenderLoop<S, L, P, N>
where
    L: DetectorLoader,
{
    config: LoopConfig,
    source: S,
    loader: L,
    model: Option<L::Model>,
    presenter: P,
    notifier: N,
    scene: SceneContext,
    state: LoopState,
}

impl<S, L, P, N> RenderLoop<S, L, P, N>
where
    S: FrameSource,
    L: DetectorLoader,
    P: Presenter,
    N: Notifier,
{
    pub fn new(config: LoopConfig, source: S, loader: L, presenter: P, notifier: N) -> Self {
        let scene = SceneContext::new(config.variant);
        Self {
            config,
            source,
            loader,
            model: None,
            presenter,
            notifier,
            scene,
            state: LoopState::AwaitingPermissions,
        }
    }

    fn enter(&mut self, state: LoopState) {
        log::info!("render loop: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.presenter.state_changed(state);
    }

    fn stall(&mut self, error: SetupError) -> SetupError {
        log::error!("render loop stalled: {error}");
        self.enter(LoopState::Stalled);
        self.notifier.setup_failed(&error);
        error
    }

    /// Acquires the camera, then loads the model. Either failure is terminal.
    ///
    /// `stop` is checked around each step; a raised flag ends setup in
    /// `Stopped` instead of `Running`. Returns the state setup ended in.
    pub fn setup(&mut self, stop: &AtomicBool) -> Result<LoopState, SetupError> {
        if self.state != LoopState::AwaitingPermissions {
            return Err(SetupError::DeviceUnavailable(format!(
                "setup already attempted (state {:?})",
                self.state
            )));
        }
        self.enter(LoopState::AwaitingPermissions);
        if stop.load(Ordering::Relaxed) {
            return Ok(self.halt());
        }

        if let Err(err) = self.source.acquire(&self.config.constraints) {
            return Err(self.stall(err));
        }
        if stop.load(Ordering::Relaxed) {
            return Ok(self.halt());
        }

        self.enter(LoopState::AwaitingModel);
        match self.loader.load() {
            Ok(model) => self.model = Some(model),
            Err(err) => return Err(self.stall(err)),
        }
        if stop.load(Ordering::Relaxed) {
            return Ok(self.halt());
        }

        self.enter(LoopState::Running);
        Ok(LoopState::Running)
    }

    fn halt(&mut self) -> LoopState {
        self.enter(LoopState::Stopped);
        LoopState::Stopped
    }

    /// One tick. Returns `None` when nothing could be presented (not running,
    /// or the camera produced no frame this time).
    pub fn tick(&mut self) -> Option<TickOutcome> {
        if self.state != LoopState::Running {
            return None;
        }
        let model = self.model.as_mut()?;

        let frame = match self.source.current_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("camera frame read failed: {err:?}");
                self.scene.react_without_frame();
                return None;
            }
        };

        log::trace!("frame {}x{} aged {:?}", frame.width, frame.height, frame.timestamp.elapsed());

        let detection = model.estimate_hands(&frame).unwrap_or_else(|err| {
            log::warn!("hand landmark inference failed: {err:?}");
            None
        });
        if let Some(hand) = &detection {
            log::trace!(
                "hand confidence {:.2} handedness {:.2}",
                hand.confidence,
                hand.handedness
            );
        }

        let outcome = self
            .scene
            .react(detection.as_ref().map(|d| &d.landmarks), frame.width, frame.height);
        let composed = self.scene.compose(frame);
        self.presenter.present(PresentedFrame {
            frame: composed,
            status: outcome.status.clone(),
            gesture: outcome.gesture,
        });
        Some(outcome)
    }

    /// Runs setup, then ticks until `stop` is raised.
    pub fn run(mut self, stop: &AtomicBool) {
        if !matches!(self.setup(stop), Ok(LoopState::Running)) {
            return;
        }

        let mut pacer = TickPacer::new(self.config.tick_interval);
        while !stop.load(Ordering::Relaxed) {
            let delay = pacer.delay_at(Instant::now());
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if stop.load(Ordering::Relaxed) {
                break;
            }
            self.tick();
        }

        self.enter(LoopState::Stopped);
    }
}

/// Owns the render loop thread. Dropping the handle stops the loop.
///
/// Shutdown never blocks on a setup step in progress (a permission dialog,
/// a model download): the thread gets [`SHUTDOWN_GRACE`] to finish and is
/// detached after that. It still observes the stop flag once the step returns.
#[derive(Debug)]
pub struct LoopHandle {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LoopHandle {
    /// Builds the loop on its own thread, so the frame source never has to
    /// cross threads.
    pub fn spawn<F, S, L, P, N>(build: F) -> anyhow::Result<Self>
    where
        F: FnOnce() -> RenderLoop<S, L, P, N> + Send + 'static,
        S: FrameSource,
        L: DetectorLoader,
        P: Presenter,
        N: Notifier,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("render-loop".into())
            .spawn(move || build().run(&stop_flag))
            .context("failed to spawn render loop thread")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + SHUTDOWN_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if !handle.is_finished() {
                log::warn!("render loop still in setup; detaching its thread");
                return;
            }
            if handle.join().is_err() {
                log::error!("render loop thread panicked");
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::{
        scene::CubeObject,
        types::{Frame, Gesture, HandDetection, Landmark, LandmarkSet, NUM_LANDMARKS},
    };
    use approx::assert_relative_eq;

    const W: u32 = 64;
    const H: u32 = 48;

    fn frame() -> Frame {
        Frame::new(vec![40; (W * H * 4) as usize], W, H)
    }

    fn open_hand() -> HandDetection {
        let mut points = [Landmark::default(); NUM_LANDMARKS];
        for (idx, p) in points.iter_mut().enumerate() {
            *p = Landmark::new(2.0 + idx as f32 * 2.0, 2.0 + idx as f32 * 2.0, 0.0);
        }
        HandDetection {
            landmarks: LandmarkSet::new(points),
            confidence: 0.9,
            handedness: 1.0,
        }
    }

    struct FakeSource {
        acquire: Result<(), SetupError>,
        acquire_calls: usize,
        /// Good frames left before every read fails; `None` never fails.
        frames_left: Option<usize>,
    }

    impl FakeSource {
        fn ok() -> Self {
            Self {
                acquire: Ok(()),
                acquire_calls: 0,
                frames_left: None,
            }
        }

        fn failing_after(frames: usize) -> Self {
            Self {
                frames_left: Some(frames),
                ..Self::ok()
            }
        }
    }

    impl FrameSource for FakeSource {
        fn acquire(&mut self, _constraints: &CameraConstraints) -> Result<(), SetupError> {
            self.acquire_calls += 1;
            self.acquire.clone()
        }

        fn current_frame(&mut self) -> anyhow::Result<Frame> {
            match &mut self.frames_left {
                Some(0) => Err(anyhow::anyhow!("device went away")),
                Some(left) => {
                    *left -= 1;
                    Ok(frame())
                }
                None => Ok(frame()),
            }
        }
    }

    type Script = VecDeque<anyhow::Result<Option<HandDetection>>>;

    struct FakeLoader {
        result: Result<(), SetupError>,
        delay: Duration,
        script: Mutex<Option<Script>>,
        load_calls: Arc<Mutex<usize>>,
    }

    impl FakeLoader {
        fn scripted(script: Vec<anyhow::Result<Option<HandDetection>>>) -> Self {
            Self {
                result: Ok(()),
                delay: Duration::ZERO,
                script: Mutex::new(Some(script.into())),
                load_calls: Arc::new(Mutex::new(0)),
            }
        }

        fn failing(err: SetupError) -> Self {
            Self {
                result: Err(err),
                ..Self::scripted(Vec::new())
            }
        }
    }

    struct FakeModel {
        script: Script,
    }

    impl DetectorLoader for FakeLoader {
        type Model = FakeModel;

        fn load(&self) -> Result<FakeModel, SetupError> {
            *self.load_calls.lock().unwrap() += 1;
            thread::sleep(self.delay);
            self.result.clone()?;
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(FakeModel { script })
        }
    }

    impl HandLandmarker for FakeModel {
        fn estimate_hands(&mut self, _frame: &Frame) -> anyhow::Result<Option<HandDetection>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        states: Arc<Mutex<Vec<LoopState>>>,
        frames: Arc<Mutex<Vec<PresentedFrame>>>,
        failures: Arc<Mutex<Vec<SetupError>>>,
    }

    impl Presenter for Recorder {
        fn state_changed(&mut self, state: LoopState) {
            self.states.lock().unwrap().push(state);
        }

        fn present(&mut self, frame: PresentedFrame) {
            self.frames.lock().unwrap().push(frame);
        }
    }

    impl Notifier for Recorder {
        fn setup_failed(&mut self, error: &SetupError) {
            self.failures.lock().unwrap().push(error.clone());
        }
    }

    fn config(variant: DemoVariant) -> LoopConfig {
        LoopConfig {
            variant,
            constraints: CameraConstraints::default(),
            tick_interval: Duration::from_millis(1),
        }
    }

    fn running_loop(
        variant: DemoVariant,
        script: Vec<anyhow::Result<Option<HandDetection>>>,
    ) -> (RenderLoop<FakeSource, FakeLoader, Recorder, Recorder>, Recorder) {
        let recorder = Recorder::default();
        let mut render_loop = RenderLoop::new(
            config(variant),
            FakeSource::ok(),
            FakeLoader::scripted(script),
            recorder.clone(),
            recorder.clone(),
        );
        assert_eq!(render_loop.setup(&AtomicBool::new(false)).unwrap(), LoopState::Running);
        (render_loop, recorder)
    }

    #[test]
    fn permission_denied_stalls_with_one_notification() {
        let recorder = Recorder::default();
        let loader = FakeLoader::scripted(Vec::new());
        let load_calls = loader.load_calls.clone();
        let source = FakeSource {
            acquire: Err(SetupError::PermissionDenied("user said no".into())),
            ..FakeSource::ok()
        };
        let render_loop = RenderLoop::new(
            config(DemoVariant::Gesture),
            source,
            loader,
            recorder.clone(),
            recorder.clone(),
        );

        render_loop.run(&AtomicBool::new(false));

        assert_eq!(
            *recorder.states.lock().unwrap(),
            vec![LoopState::AwaitingPermissions, LoopState::Stalled]
        );
        assert_eq!(
            *recorder.failures.lock().unwrap(),
            vec![SetupError::PermissionDenied("user said no".into())]
        );
        assert!(recorder.frames.lock().unwrap().is_empty());
        assert_eq!(*load_calls.lock().unwrap(), 0);
    }

    #[test]
    fn model_failure_stalls_after_camera() {
        let recorder = Recorder::default();
        let mut render_loop = RenderLoop::new(
            config(DemoVariant::Cube),
            FakeSource::ok(),
            FakeLoader::failing(SetupError::ModelLoad("offline".into())),
            recorder.clone(),
            recorder.clone(),
        );

        assert!(render_loop.setup(&AtomicBool::new(false)).is_err());
        assert_eq!(render_loop.state, LoopState::Stalled);
        assert!(render_loop.tick().is_none());
        assert!(render_loop.setup(&AtomicBool::new(false)).is_err());

        assert_eq!(
            *recorder.states.lock().unwrap(),
            vec![
                LoopState::AwaitingPermissions,
                LoopState::AwaitingModel,
                LoopState::Stalled
            ]
        );
        assert_eq!(recorder.failures.lock().unwrap().len(), 1);
        assert_eq!(render_loop.source.acquire_calls, 1);
    }

    #[test]
    fn no_hand_reports_status_and_draws_nothing() {
        let (mut render_loop, recorder) = running_loop(DemoVariant::Gesture, vec![Ok(None)]);

        let outcome = render_loop.tick().unwrap();
        assert_eq!(outcome.gesture, Gesture::NoneDetected);
        assert_eq!(outcome.status, "No hand detected.");
        assert!(render_loop.scene.overlay().is_clear());

        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].status, "No hand detected.");
        assert_eq!(frames[0].frame.rgba, frame().rgba);
    }

    #[test]
    fn open_hand_is_classified_and_drawn() {
        let (mut render_loop, recorder) =
            running_loop(DemoVariant::Gesture, vec![Ok(Some(open_hand()))]);

        let outcome = render_loop.tick().unwrap();
        assert_eq!(outcome.gesture, Gesture::OpenHand);
        assert!(!render_loop.scene.overlay().is_clear());

        let frames = recorder.frames.lock().unwrap();
        assert_ne!(frames[0].frame.rgba, frame().rgba);
    }

    #[test]
    fn inference_errors_do_not_stop_ticking() {
        let (mut render_loop, _recorder) = running_loop(
            DemoVariant::Gesture,
            vec![Err(anyhow::anyhow!("session blew up")), Ok(Some(open_hand()))],
        );

        assert_eq!(render_loop.tick().unwrap().gesture, Gesture::NoneDetected);
        assert_eq!(render_loop.tick().unwrap().gesture, Gesture::OpenHand);
        assert_eq!(render_loop.state, LoopState::Running);
    }

    #[test]
    fn cube_keeps_spinning_without_hand() {
        let (mut render_loop, _recorder) = running_loop(DemoVariant::Cube, vec![Ok(None), Ok(None)]);

        render_loop.tick();
        render_loop.tick();

        let cube = render_loop.scene.cube();
        assert_relative_eq!(cube.rotation.0, 0.02);
        assert_relative_eq!(cube.rotation.1, 0.02);
        assert_eq!(cube.position, CubeObject::default().position);
    }

    #[test]
    fn cube_keeps_spinning_when_frames_fail() {
        let recorder = Recorder::default();
        let mut render_loop = RenderLoop::new(
            config(DemoVariant::Cube),
            FakeSource::failing_after(1),
            FakeLoader::scripted(Vec::new()),
            recorder.clone(),
            recorder.clone(),
        );
        render_loop.setup(&AtomicBool::new(false)).unwrap();

        assert!(render_loop.tick().is_some());
        assert!(render_loop.tick().is_none());
        assert!(render_loop.tick().is_none());

        let cube = render_loop.scene.cube();
        assert_relative_eq!(cube.rotation.0, 0.03);
        assert_relative_eq!(cube.rotation.1, 0.03);
        assert_eq!(recorder.frames.lock().unwrap().len(), 1);
        assert_eq!(render_loop.state, LoopState::Running);
    }

    #[test]
    fn raised_flag_skips_setup() {
        let recorder = Recorder::default();
        let mut render_loop = RenderLoop::new(
            config(DemoVariant::Gesture),
            FakeSource::ok(),
            FakeLoader::scripted(Vec::new()),
            recorder.clone(),
            recorder.clone(),
        );

        assert_eq!(render_loop.setup(&AtomicBool::new(true)).unwrap(), LoopState::Stopped);
        assert_eq!(render_loop.source.acquire_calls, 0);
        assert!(recorder.failures.lock().unwrap().is_empty());
        assert!(render_loop.tick().is_none());
    }

    #[test]
    fn stop_during_model_load_does_not_block() {
        let recorder = Recorder::default();
        let for_loop = recorder.clone();
        let handle = LoopHandle::spawn(move || {
            let loader = FakeLoader {
                delay: Duration::from_secs(2),
                ..FakeLoader::scripted(Vec::new())
            };
            RenderLoop::new(
                config(DemoVariant::Cube),
                FakeSource::ok(),
                loader,
                for_loop.clone(),
                for_loop,
            )
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !recorder.states.lock().unwrap().contains(&LoopState::AwaitingModel)
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(2));
        }

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(1));

        // The detached thread finishes loading, sees the flag and never runs.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !recorder.states.lock().unwrap().contains(&LoopState::Stopped)
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(10));
        }
        let states = recorder.states.lock().unwrap();
        assert_eq!(states.last(), Some(&LoopState::Stopped));
        assert!(!states.contains(&LoopState::Running));
        assert!(recorder.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_flag_ends_spawned_loop() {
        let recorder = Recorder::default();
        let for_loop = recorder.clone();
        let handle = LoopHandle::spawn(move || {
            RenderLoop::new(
                config(DemoVariant::Cube),
                FakeSource::ok(),
                FakeLoader::scripted(Vec::new()),
                for_loop.clone(),
                for_loop,
            )
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.frames.lock().unwrap().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        handle.stop();

        let states = recorder.states.lock().unwrap();
        assert_eq!(states.last(), Some(&LoopState::Stopped));
        assert!(states.contains(&LoopState::Running));
        assert!(recorder.frames.lock().unwrap().len() >= 3);
    }

    #[test]
    fn pacer_delays_but_never_stacks() {
        let interval = Duration::from_millis(10);
        let mut pacer = TickPacer::new(interval);
        let start = Instant::now();

        assert_eq!(pacer.delay_at(start), Duration::ZERO);
        assert_eq!(pacer.delay_at(start + Duration::from_millis(4)), Duration::from_millis(6));

        // A long stall: the next tick is due immediately, then spacing resumes.
        let late = start + Duration::from_millis(100);
        assert_eq!(pacer.delay_at(late), Duration::ZERO);
        assert_eq!(pacer.delay_at(late), interval);
    }

    #[test]
    fn channel_presenter_keeps_only_newest_frame() {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
        let mut presenter = ChannelPresenter::new(event_tx, frame_tx, frame_rx.clone());

        for status in ["first", "second", "third"] {
            presenter.present(PresentedFrame {
                frame: frame(),
                status: status.to_string(),
                gesture: Gesture::NoneDetected,
            });
        }
        presenter.state_changed(LoopState::Running);
        presenter.setup_failed(&SetupError::DeviceUnavailable("gone".into()));

        assert_eq!(frame_rx.try_recv().unwrap().status, "third");
        assert!(frame_rx.try_recv().is_err());
        assert!(matches!(event_rx.try_recv(), Ok(LoopEvent::State(LoopState::Running))));
        assert!(matches!(event_rx.try_recv(), Ok(LoopEvent::SetupFailed(_))));
    }
}
