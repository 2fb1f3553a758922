use axum::response::sse::Event;
use futures::Stream;
use futures::future::Either;
use std::time::Duration;
use tokio_stream::StreamExt;

/// Inject a dialect-appropriate no-op frame whenever `inner` stays quiet for
/// `period_ms`. Covers both the wait for the first upstream byte and any
/// later stall. `0` disables injection.
///
/// Implemented over a repeating timeout: the timer rearms on every inner
/// item, so frames only appear in genuinely quiet intervals.
pub fn heartbeat_stream<S, E, F>(
    inner: S,
    period_ms: u64,
    make_heartbeat: F,
) -> impl Stream<Item = Result<Event, E>>
where
    S: Stream<Item = Result<Event, E>>,
    F: Fn() -> Event,
{
    if period_ms == 0 {
        return Either::Left(inner);
    }

    let period = Duration::from_millis(period_ms);
    let interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    Either::Right(
        inner
            .timeout_repeating(interval)
            .map(move |item| item.unwrap_or_else(|_elapsed| Ok(make_heartbeat()))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    #[tokio::test(start_paused = true)]
    async fn quiet_interval_yields_heartbeats() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, std::convert::Infallible>>(4);
        let stream = heartbeat_stream(
            tokio_stream::wrappers::ReceiverStream::new(rx),
            1000,
            || Event::default().comment("heartbeat"),
        );
        tokio::pin!(stream);

        // Nothing sent: the first poll after the period is a heartbeat.
        let first = stream.next().await.unwrap().unwrap();
        drop(first);

        tx.send(Ok(Event::default().data("payload"))).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        drop(second);
        drop(tx);

        // Stream ends once the sender is gone and no timer fires in between.
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn zero_period_disables_injection() {
        let inner = futures::stream::iter(vec![Ok::<_, std::convert::Infallible>(
            Event::default().data("only"),
        )]);
        let stream = heartbeat_stream(inner, 0, || Event::default().comment("heartbeat"));
        tokio::pin!(stream);

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }
}
