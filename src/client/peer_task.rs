use crate::config::ClientConfig;
use crate::error::Result;
use crate::peer::{PeerSession, SessionState};
use crate::piece::BlockPicker;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Timer period for liveness and keep-alive checks
fn tick_period(config: &ClientConfig) -> Duration {
    (config.keep_alive_interval.min(config.peer_timeout) / 2).max(Duration::from_millis(10))
}

/// Run one connection until it fails or goes idle for longer than
/// `peer_timeout`. Reads, completion notifications and the timer are
/// multiplexed; each handler runs to completion before the next select.
pub async fn drive<S>(mut session: PeerSession<S>, config: &ClientConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let result = run(&mut session, config).await;
    session.disconnect().await;
    result
}

async fn run<S>(session: &mut PeerSession<S>, config: &ClientConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut completed = session.download().subscribe();
    let mut tick = tokio::time::interval(tick_period(config));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    refresh(session, config).await?;

    while session.state() != SessionState::Disconnected {
        tokio::select! {
            message = session.read_message() => {
                let message = message?;
                session.handle_message(&message).await?;
                refresh(session, config).await?;
            }
            piece = completed.recv() => match piece {
                Ok(piece) => {
                    session.send_have(piece).await?;
                    refresh(session, config).await?;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Peer {} missed {} completion notices", session.label(), missed);
                    refresh(session, config).await?;
                }
                Err(RecvError::Closed) => break,
            },
            _ = tick.tick() => {
                if session.idle_for() > config.peer_timeout {
                    info!("Peer {} idle for {:?}, dropping", session.label(), session.idle_for());
                    break;
                }
                if session.quiet_for() >= config.keep_alive_interval {
                    session.send_keep_alive().await?;
                }
            }
        }
    }
    Ok(())
}

/// Bring interest, our choke of the peer and outstanding requests in line
/// with what both sides have
async fn refresh<S>(session: &mut PeerSession<S>, config: &ClientConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let interesting = session.is_interesting();
    let flags = session.flags();

    if interesting && !flags.am_interested {
        session.send_interested().await?;
    } else if !interesting && flags.am_interested {
        session.send_not_interested().await?;
    }

    if flags.peer_interested && flags.peer_choked {
        debug!("Unchoking {}", session.label());
        session.send_unchoke().await?;
    }

    if interesting && !flags.am_choked {
        fill_requests(session, config.max_pending_requests).await?;
    }
    Ok(())
}

async fn fill_requests<S>(session: &mut PeerSession<S>, limit: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let room = limit.saturating_sub(session.pending().len());
    if room == 0 {
        return Ok(());
    }

    let picks = BlockPicker::new(session.download().state(), session.has_pieces())
        .pick(session.pending(), room);
    for (piece, block) in picks {
        session.request_block(piece, block).await?;
    }
    Ok(())
}
