use iocraft::prelude::*;
use picup::ProgressEvent;
use tokio::sync::watch;

const BAR_WIDTH: usize = 30;

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub progress: Option<watch::Receiver<ProgressEvent>>,
}

/// A single bar redrawn whenever a new event arrives on `progress`.
#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut latest = hooks.use_state(ProgressEvent::default);
    let progress = props.progress.clone();

    hooks.use_future(async move {
        let Some(mut progress) = progress else {
            return;
        };
        while progress.changed().await.is_ok() {
            let event = *progress.borrow_and_update();
            latest.set(event);
        }
    });

    let event = latest.get();
    let filled = (event.percent as usize).min(100) * BAR_WIDTH / 100;
    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled));

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(content: props.title.clone())
            View(flex_direction: FlexDirection::Row) {
                Text(color: Color::Cyan, content: bar)
                Text(content: format!(
                    " {:>2}% ({}/{} bytes)",
                    event.percent, event.bytes_written, event.content_length
                ))
            }
        }
    }
}

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "◆ ")
            Text(content: props.message.clone())
        }
    }
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "▲ ")
            Text(content: props.message.clone())
        }
    }
}
