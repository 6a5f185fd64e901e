use tokio::time::{self, Duration, Instant};

/// Longest wait between two tokens.
const MAX_PERIOD: Duration = Duration::from_secs(1_000);

/// Limits how quickly the workers of one run can dispatch requests.
///
/// Workers must add a token to the bounded channel before making a request, and
/// this task limits how frequently tokens are removed, thereby throttling how
/// fast requests can be made. It is a variation on the leaky bucket algorithm:
/// instead of leaking the overflow we asynchronously block.
pub(crate) async fn throttle_main(
    qps: f64,
    throttle_receiver: flume::Receiver<bool>,
    parent_receiver: flume::Receiver<bool>,
) {
    let period = Duration::try_from_secs_f64(1.0 / qps)
        .unwrap_or(MAX_PERIOD)
        .clamp(Duration::from_nanos(1), MAX_PERIOD);
    info!("throttle allowing 1 request every {:?}", period);

    // Missed ticks are made up in a burst, so the average rate holds even when
    // the period is shorter than the timer granularity.
    let mut interval = time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Remove a token from the channel, freeing a spot for a request.
                let _ = throttle_receiver.try_recv();
            }
            // A message or a dropped sender both mean the run is over.
            _ = parent_receiver.recv_async() => {
                info!("run complete, closing throttle channel");
                break;
            }
        }
    }
    // Dropping `throttle_receiver` disconnects any worker still waiting to send.
}

/// Spawn a throttle task if `qps` is positive.
///
/// Returns the channel workers send tokens to, and the channel used to tell the
/// throttle task the run is over.
pub(crate) fn setup_throttle(
    qps: f64,
) -> (Option<flume::Sender<bool>>, Option<flume::Sender<bool>>) {
    if qps.is_nan() || qps <= 0.0 {
        return (None, None);
    }

    // Fractional rates still need room for one token.
    let capacity = (qps.ceil() as usize).max(1);
    let (throttle_tx, throttle_rx) = flume::bounded(capacity);
    let (parent_to_throttle_tx, parent_rx) = flume::bounded(1);

    tokio::spawn(throttle_main(qps, throttle_rx, parent_rx));

    // Fill all but one slot to avoid a burst of traffic during startup.
    for _ in 1..capacity {
        let _ = throttle_tx.try_send(true);
    }

    (Some(throttle_tx), Some(parent_to_throttle_tx))
}
