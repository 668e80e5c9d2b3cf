/// Wallet monitoring example: streams positions, open orders, executions and balances
/// for the wallet in `WALLET_ADDRESS`.
///
/// Subscriptions are made from the `connected` message, so they are also recorded for
/// replay if the connection drops.
use reya_sdk::*;

struct WalletMonitor {
    address: String,
}

impl SessionHandler for WalletMonitor {
    fn on_message(&mut self, session: &SessionHandle, message: InboundMessage) {
        match message {
            InboundMessage::Connected(m) => {
                println!(
                    "Connected with ID: {}",
                    m.connection_id.as_deref().unwrap_or("unknown")
                );
                println!("Monitoring wallet: {}", self.address);

                let wallet = session.wallet();
                for subscription in [
                    wallet.positions(&self.address),
                    wallet.open_orders(&self.address),
                    wallet.perp_executions(&self.address),
                    wallet.account_balances(&self.address),
                ] {
                    if let Err(e) = subscription.subscribe(false) {
                        eprintln!("Subscribe failed: {e}");
                    }
                }
            }
            InboundMessage::Subscribed(m) => println!("Successfully subscribed to {}", m.channel),
            InboundMessage::ChannelData(data) => match data.typed() {
                Ok(ChannelUpdate::Positions(positions)) => {
                    println!("\n--- POSITIONS UPDATE ---");
                    for p in positions {
                        println!(
                            "{} account {}: {:?} {} @ {}",
                            p.symbol, p.account_id, p.side, p.qty, p.avg_entry_price
                        );
                    }
                }
                Ok(ChannelUpdate::Orders(orders)) => {
                    println!("\n--- ORDERS UPDATE ---");
                    for o in orders {
                        let remaining = o
                            .remaining_qty()
                            .map(|q| q.to_string())
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "Order {}: {} {:?} {:?} @ {} remaining {} status {:?}",
                            o.order_id, o.symbol, o.order_type, o.side, o.limit_px, remaining, o.status
                        );
                    }
                }
                Ok(ChannelUpdate::PerpExecutions(executions)) => {
                    println!("\n--- EXECUTIONS UPDATE ---");
                    for e in executions {
                        println!(
                            "#{} {} {:?} {} @ {} fee {}",
                            e.sequence_number, e.symbol, e.side, e.qty, e.price, e.fee
                        );
                    }
                }
                Ok(ChannelUpdate::Raw(raw)) => {
                    println!("\n--- {} ---\n{raw}", data.channel);
                }
                Ok(other) => println!("{}: {other:?}", data.channel),
                Err(e) => eprintln!("{}: could not decode ({e})", data.channel),
            },
            InboundMessage::Error(e) => println!("Error: {}", e.message),
            _ => {}
        }
    }

    fn on_error(&mut self, _session: &SessionHandle, error: &ReyaError) {
        eprintln!("Session error: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Ok(address) = std::env::var("WALLET_ADDRESS") else {
        println!("Please set the WALLET_ADDRESS environment variable");
        return Ok(());
    };

    let session = ConnectionSession::from_env()?;
    println!("Connecting to {}", session.config().url);

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Closing session");
            handle.close();
        }
    });

    session.connect(WalletMonitor { address }).await?;
    Ok(())
}
