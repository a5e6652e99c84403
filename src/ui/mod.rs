use std::{path::PathBuf, sync::Arc};

use crossbeam_channel::{Receiver, bounded, unbounded};
use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, PromptLevel,
    Render, RenderImage, Styled, StyledImage, TitlebarOptions, Window, WindowOptions, div, img,
};
use gpui_component::{ActiveTheme, Root, h_flex, v_flex};

use crate::{
    error::SetupError,
    pipeline::{DefaultFrameSource, OrtLoader},
    render_loop::{ChannelPresenter, LoopConfig, LoopEvent, LoopHandle, RenderLoop},
    types::{Gesture, LoopState, PresentedFrame},
};

mod render_util;

use render_util::frame_to_image;

pub struct LaunchOptions {
    pub config: LoopConfig,
    pub models_dir: PathBuf,
    pub min_confidence: f32,
}

pub fn launch_ui(app: &mut App, options: LaunchOptions) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some(options.config.variant.title().into()),
            ..Default::default()
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| AppView::new(options));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

struct AppView {
    state: LoopState,
    status: String,
    gesture: Gesture,
    events: Receiver<LoopEvent>,
    frames: Receiver<PresentedFrame>,
    latest_image: Option<Arc<RenderImage>>,
    pending_failure: Option<SetupError>,
    // Stops the loop thread when the window goes away.
    _render_loop: Option<LoopHandle>,
}

impl AppView {
    fn new(options: LaunchOptions) -> Self {
        let (event_tx, events) = unbounded();
        let (frame_tx, frames) = bounded(1);
        let presenter = ChannelPresenter::new(event_tx, frame_tx, frames.clone());

        let LaunchOptions {
            config,
            models_dir,
            min_confidence,
        } = options;
        let spawned = LoopHandle::spawn(move || {
            RenderLoop::new(
                config,
                DefaultFrameSource::new(),
                OrtLoader::new(models_dir, min_confidence),
                presenter.clone(),
                presenter,
            )
        });

        let (render_loop, pending_failure) = match spawned {
            Ok(handle) => (Some(handle), None),
            Err(err) => {
                log::error!("{err:?}");
                (None, Some(SetupError::DeviceUnavailable(format!("{err:#}"))))
            }
        };
        let status = pending_failure
            .as_ref()
            .map(|err| err.notification_title().to_string())
            .unwrap_or_default();

        Self {
            state: LoopState::AwaitingPermissions,
            status,
            gesture: Gesture::NoneDetected,
            events,
            frames,
            latest_image: None,
            pending_failure,
            _render_loop: render_loop,
        }
    }

    fn poll_loop(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                LoopEvent::State(state) => self.state = state,
                LoopEvent::SetupFailed(err) => {
                    self.status = err.notification_title().to_string();
                    self.pending_failure = Some(err);
                }
            }
        }

        if let Ok(presented) = self.frames.try_recv() {
            self.status = presented.status;
            self.gesture = presented.gesture;
            if let Some(image) = frame_to_image(&presented.frame) {
                self.replace_latest_image(image, window, cx);
            }
        }

        // The loop reports a failure once; the prompt is shown once.
        if let Some(err) = self.pending_failure.take() {
            cx.defer_in(window, move |_, window, cx| {
                let _ = window.prompt(
                    PromptLevel::Critical,
                    err.notification_title(),
                    Some(&err.to_string()),
                    &["OK"],
                    cx,
                );
            });
        }
    }

    fn replace_latest_image(
        &mut self,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        if let Some(old_image) = self.latest_image.replace(new_image) {
            // The sprite atlas keeps every frame otherwise.
            cx.drop_image(old_image, Some(window));
        }
    }
}

impl Render for AppView {
    fn render(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) -> impl IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        self.poll_loop(window, cx);

        let theme = cx.theme();
        let state_color = match self.state {
            LoopState::Running => theme.success,
            LoopState::Stalled => theme.danger,
            _ => theme.muted_foreground,
        };
        let status_color = match self.gesture {
            Gesture::OpenHand | Gesture::ClosedFist => theme.success,
            Gesture::NoneDetected | Gesture::Unrecognized => theme.foreground,
        };

        let frame_view: AnyElement = if let Some(image) = &self.latest_image {
            img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .into_any_element()
        } else {
            div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(theme.muted_foreground)
                .child(self.state.label())
                .into_any_element()
        };

        v_flex()
            .size_full()
            .gap_2()
            .p_3()
            .bg(theme.background)
            .child(
                div()
                    .flex_1()
                    .w_full()
                    .overflow_hidden()
                    .rounded_lg()
                    .bg(gpui::rgb(0x000000))
                    .child(frame_view),
            )
            .child(
                h_flex()
                    .justify_between()
                    .items_center()
                    .gap_2()
                    .child(
                        div()
                            .text_base()
                            .text_color(status_color)
                            .child(self.status.clone()),
                    )
                    .child(
                        div()
                            .text_xs()
                            .text_color(state_color)
                            .child(self.state.label()),
                    ),
            )
    }
}
