/// Market monitoring example: subscribes to market summaries, executions and prices
/// for one symbol and prints every decoded update.
///
/// Run with: cargo run --example market_monitoring -- ETHRUSDPERP
use reya_sdk::*;

struct Monitor {
    updates: usize,
    limit: usize,
}

impl SessionHandler for Monitor {
    fn on_open(&mut self, session: &SessionHandle) {
        println!(
            "Connected, {} subscriptions queued",
            session.subscription_count()
        );
    }

    fn on_message(&mut self, session: &SessionHandle, message: InboundMessage) {
        match message {
            InboundMessage::Connected(m) => {
                println!("Connection id: {}", m.connection_id.as_deref().unwrap_or("unknown"));
            }
            InboundMessage::Subscribed(m) => println!("Subscribed to {}", m.channel),
            InboundMessage::ChannelData(data) => {
                match data.typed() {
                    Ok(ChannelUpdate::MarketSummaries(summaries)) => {
                        for s in summaries {
                            println!(
                                "  {} oi={} funding={} volume24h={}",
                                s.symbol, s.oi_qty, s.funding_rate, s.volume24h
                            );
                        }
                    }
                    Ok(ChannelUpdate::PerpExecutions(executions)) => {
                        for e in executions {
                            println!(
                                "  {} {:?} {} @ {} (notional {})",
                                e.symbol,
                                e.side,
                                e.qty,
                                e.price,
                                e.notional()
                            );
                        }
                    }
                    Ok(ChannelUpdate::Prices(prices)) => {
                        for p in prices {
                            println!(
                                "  {} oracle={:?} pool={:?}",
                                p.symbol, p.oracle_price, p.pool_price
                            );
                        }
                    }
                    Ok(other) => println!("  {}: {other:?}", data.channel),
                    Err(e) => println!("  {}: could not decode ({e})", data.channel),
                }

                self.updates += 1;
                if self.updates >= self.limit {
                    println!("Received {} updates, closing", self.updates);
                    session.close();
                }
            }
            InboundMessage::Error(e) => println!("Server error: {}", e.message),
            _ => {}
        }
    }

    fn on_error(&mut self, _session: &SessionHandle, error: &ReyaError) {
        eprintln!("Session error: {error}");
    }

    fn on_close(&mut self, _session: &SessionHandle, reason: CloseReason) {
        println!("Session closed: {reason:?}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let symbol = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ETHRUSDPERP".to_string());

    let session = ConnectionSession::from_env()?;
    println!("Connecting to {}", session.config().url);

    session.market().all_markets_summary().subscribe(false)?;
    session.market().summary(&symbol).subscribe(false)?;
    session.market().perp_executions(&symbol).subscribe(false)?;
    session.prices().price(&symbol).subscribe(false)?;

    let monitor = Monitor {
        updates: 0,
        limit: 50,
    };
    session.connect(monitor).await?;
    Ok(())
}
