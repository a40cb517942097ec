//! Main application.
//!
//! `Application` owns one cache and the gateway it is currently bound to.
//! Everything derived from the gateway (services, reader, executor, event
//! bus) lives in a [`Session`] and is rebuilt on every rebind; the cache is
//! bumped to the new generation first, so late results of the old session
//! are discarded.

use crate::config::{AccountConfig, AppConfig};
use crate::error::{AppError, AppResult};
use alloy::primitives::Address;
use chrono::Utc;
use hvx_chain::{
    ensure_network, Binding, ChainError, ChainEvent, ChainGuard, ContractGateway, KeyError,
    KeyManager, NetworkSwitcher, RevertRegistry, RpcMarket, RpcTradingAccount, SwitchOutcome,
    TradingAccount, TxReceipt,
};
use hvx_core::{
    AccountView, DecimalConvention, Direction, MarketSnapshot, PositionView, Price, Size,
    TradePreview,
};
use hvx_market::{
    chart, ChartPoint, FundingInfo, FundingRateEstimator, HyperliquidMidsFeed, IndexPriceFeed,
    MarketSnapshotService, PositionValuationService, TradeHistoryService, TradePoint,
};
use hvx_sync::{
    CacheUpdate, CachedReader, EventReconciliationBus, InvalidationTrigger, Invalidator,
    RefreshRequest, RefreshScope, SnapshotCache, SyncScheduler,
};
use hvx_trade::{
    estimate_trade, size_for_leverage, MutationExecutor, TradeError, TradeEstimate,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything bound to one gateway generation.
struct Session {
    reader: Arc<CachedReader>,
    history: TradeHistoryService,
    executor: Option<Arc<MutationExecutor>>,
    invalidator: Invalidator,
    bus: Arc<EventReconciliationBus>,
    requests: Option<mpsc::UnboundedReceiver<RefreshRequest>>,
    cancel: CancellationToken,
}

/// Contract quote with the client-side trade-form estimates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewSummary {
    pub quote: TradePreview,
    pub estimate: TradeEstimate,
}

/// HyperVIX client application.
pub struct Application {
    config: AppConfig,
    convention: DecimalConvention,
    feed: Arc<dyn IndexPriceFeed>,
    gateway: ContractGateway,
    cache: Arc<SnapshotCache>,
    funding: FundingRateEstimator,
    session: Session,
    cancel: CancellationToken,
}

impl Application {
    /// Connect to the configured network over JSON-RPC.
    ///
    /// Without a trading key the application runs read-only.
    pub fn connect(config: AppConfig) -> AppResult<Self> {
        let reverts = Arc::new(RevertRegistry::default());
        let market = Arc::new(RpcMarket::connect(
            &config.network.rpc_url,
            config.contracts,
            Arc::clone(&reverts),
        )?);

        let keys = load_keys(&config.account)?;
        let mut gateway = ContractGateway::read_only(
            market.clone(),
            market,
            Binding::initial(config.network.chain_id, config.account.watch_address),
        );
        if let Some(signer) = keys.signer() {
            let trader = RpcTradingAccount::connect(
                &config.network.rpc_url,
                config.contracts,
                signer.clone(),
                reverts,
            )?;
            gateway = gateway.with_trading_account(Arc::new(trader));
        }

        let feed = Arc::new(HyperliquidMidsFeed::new(
            config.feed.info_url.clone(),
            config.feed.timeout(),
        )?);
        Self::new(config, gateway, feed)
    }

    /// Build around an already constructed gateway and index feed.
    pub fn new(
        config: AppConfig,
        gateway: ContractGateway,
        feed: Arc<dyn IndexPriceFeed>,
    ) -> AppResult<Self> {
        config.validate()?;
        let convention = config.convention()?;
        let cache = Arc::new(SnapshotCache::new());
        cache.bind(gateway.binding().generation);
        let cancel = CancellationToken::new();
        let session = open_session(&config, convention, &feed, &gateway, &cache, &cancel);

        info!(
            chain_id = gateway.binding().chain_id,
            account = ?gateway.binding().account,
            signer = gateway.has_signer(),
            convention = %config.decimals.convention,
            "Application initialized"
        );

        Ok(Self {
            funding: FundingRateEstimator::new(config.funding),
            config,
            convention,
            feed,
            gateway,
            cache,
            session,
            cancel,
        })
    }

    // ========================================================================
    // Binding
    // ========================================================================

    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[inline]
    pub fn binding(&self) -> Binding {
        self.gateway.binding()
    }

    #[inline]
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    #[inline]
    pub fn convention(&self) -> DecimalConvention {
        self.convention
    }

    /// Account the client acts as: the signer, else the watch address.
    #[inline]
    pub fn active_account(&self) -> Option<Address> {
        self.gateway.binding().account
    }

    pub fn has_signer(&self) -> bool {
        self.gateway.has_signer()
    }

    /// Rebind to `gateway`. Its generation must be newer than the current one.
    ///
    /// The running session is cancelled and the cache cleared before the
    /// new session is built.
    pub fn rebind(&mut self, gateway: ContractGateway) -> AppResult<()> {
        let current = self.gateway.binding();
        let next = gateway.binding();
        if next.generation <= current.generation {
            return Err(AppError::Config(format!(
                "Stale binding generation {} (current {})",
                next.generation, current.generation
            )));
        }

        self.session.cancel.cancel();
        self.cache.bind(next.generation);
        self.session = open_session(
            &self.config,
            self.convention,
            &self.feed,
            &gateway,
            &self.cache,
            &self.cancel,
        );
        self.gateway = gateway;

        info!(
            generation = next.generation,
            chain_id = next.chain_id,
            account = ?next.account,
            "Rebound gateway"
        );
        Ok(())
    }

    /// Rebind to a different signing account on the same chain.
    pub fn switch_account(&mut self, trader: Arc<dyn TradingAccount>) -> AppResult<()> {
        let current = self.gateway.binding();
        let gateway = ContractGateway::read_only(
            self.gateway.reader(),
            self.gateway.events(),
            current.successor(current.chain_id, Some(trader.account())),
        )
        .with_trading_account(trader);
        self.rebind(gateway)
    }

    /// Point the wallet at the configured network, adding it when unknown,
    /// then rebind so nothing read under the previous chain survives.
    pub async fn switch_network(&mut self, switcher: &dyn NetworkSwitcher) -> AppResult<SwitchOutcome> {
        let outcome = ensure_network(switcher, &self.config.network).await?;

        let current = self.gateway.binding();
        let mut gateway = ContractGateway::read_only(
            self.gateway.reader(),
            self.gateway.events(),
            current.successor(self.config.network.chain_id, current.account),
        );
        if let Ok(trader) = self.gateway.trading_account() {
            gateway = gateway.with_trading_account(trader);
        }
        self.rebind(gateway)?;
        Ok(outcome)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn snapshot(&self) -> AppResult<Arc<MarketSnapshot>> {
        Ok(self.session.reader.snapshot().await?)
    }

    pub async fn account(&self, address: Address) -> AppResult<Arc<AccountView>> {
        Ok(self.session.reader.account(address).await?)
    }

    pub async fn position(&self, address: Address) -> AppResult<Option<PositionView>> {
        Ok(self.session.reader.position(address).await?)
    }

    /// Funding summary with the predicted next rate.
    pub async fn funding_info(&self) -> AppResult<FundingInfo> {
        let snapshot = self.snapshot().await?;
        Ok(self.funding.funding_info(&snapshot))
    }

    pub async fn recent_trades(&self) -> AppResult<Vec<TradePoint>> {
        Ok(self.session.history.recent_trades().await?)
    }

    /// Recent fills bucketed for display.
    pub async fn price_chart(&self) -> AppResult<Vec<ChartPoint>> {
        let trades = self.recent_trades().await?;
        Ok(chart(
            &trades,
            self.config.history.chart_bucket_secs,
            Utc::now(),
        ))
    }

    pub async fn last_settled_funding_rate(&self) -> AppResult<Option<Decimal>> {
        Ok(self.session.history.last_settled_funding_rate().await?)
    }

    /// Mark every cached entry stale and queue a full refresh.
    pub fn refresh(&self) {
        self.session
            .invalidator
            .invalidate(RefreshScope::All, InvalidationTrigger::Manual);
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    fn executor(&self) -> AppResult<&Arc<MutationExecutor>> {
        self.session
            .executor
            .as_ref()
            .ok_or(AppError::Chain(ChainError::NoSigner))
    }

    /// Quote a trade and estimate the resulting position.
    ///
    /// Without `margin` the estimate assumes the contract's required margin.
    pub async fn preview(
        &self,
        direction: Direction,
        size: Size,
        margin: Option<Decimal>,
    ) -> AppResult<PreviewSummary> {
        let quote = self.executor()?.preview(direction.signed(size)).await?;
        let snapshot = self.snapshot().await?;

        let entry = if quote.average_price.is_positive() {
            quote.average_price
        } else {
            snapshot.mark_price
        };
        let margin = margin.unwrap_or(quote.required_margin);
        let estimate = estimate_trade(direction, size, margin, entry, &snapshot.risk_params);
        if estimate.exceeds_max_leverage {
            warn!(
                leverage = ?estimate.leverage,
                max = %snapshot.risk_params.max_leverage,
                "Estimated leverage above market maximum"
            );
        }

        Ok(PreviewSummary { quote, estimate })
    }

    /// Size that `margin` buys at `leverage` at the current mark price.
    pub async fn size_for_leverage(&self, margin: Decimal, leverage: Decimal) -> AppResult<Size> {
        let snapshot = self.snapshot().await?;
        size_for_leverage(margin, leverage, snapshot.mark_price).ok_or_else(|| {
            AppError::Trade(TradeError::InvalidInput(format!(
                "no size for margin {margin} at leverage {leverage} and mark {}",
                snapshot.mark_price
            )))
        })
    }

    pub async fn open_position(
        &self,
        direction: Direction,
        size: Size,
        margin: Decimal,
    ) -> AppResult<TxReceipt> {
        Ok(self
            .executor()?
            .open_position(direction, size, margin)
            .await?)
    }

    pub async fn close_position(&self) -> AppResult<TxReceipt> {
        Ok(self.executor()?.close_position().await?)
    }

    pub async fn liquidate(&self, target: Address) -> AppResult<TxReceipt> {
        Ok(self.executor()?.liquidate(target).await?)
    }

    pub async fn request_faucet(&self, amount: Decimal) -> AppResult<TxReceipt> {
        Ok(self.executor()?.request_faucet(amount).await?)
    }

    // ========================================================================
    // Background sync
    // ========================================================================

    /// Scheduler for the current session. `None` once it has been taken.
    pub fn take_scheduler(&mut self) -> Option<SyncScheduler> {
        let requests = self.session.requests.take()?;
        Some(SyncScheduler::new(
            Arc::clone(&self.session.reader),
            Arc::clone(&self.session.bus),
            requests,
            self.config.sync.clone(),
            self.active_account(),
        ))
    }

    /// Token that stops the current session's background tasks.
    pub fn session_token(&self) -> CancellationToken {
        self.session.cancel.clone()
    }

    /// Keep the cache in sync and log every change until Ctrl-C.
    pub async fn run(&mut self) -> AppResult<()> {
        let scheduler = self
            .take_scheduler()
            .ok_or_else(|| AppError::Config("Scheduler already running".to_string()))?;
        let handle = tokio::spawn(scheduler.run(self.session_token()));

        let mut updates = self.cache.subscribe();
        let mut events = self.session.bus.subscribe_events();
        info!("Watching market, press Ctrl-C to stop");

        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Ok(update) => self.log_update(update),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Cache update listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown();
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
        Ok(())
    }

    /// Stop every background task of every session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn log_update(&self, update: CacheUpdate) {
        match update {
            CacheUpdate::Market => {
                if let Some(entry) = self.cache.market() {
                    let snapshot = &entry.value;
                    info!(
                        mark = %snapshot.mark_price,
                        index = %snapshot.index_price,
                        index_source = ?snapshot.index_source,
                        volatility = %snapshot.volatility,
                        predicted_funding = %self.funding.predict_funding_rate(snapshot),
                        "Market updated"
                    );
                }
            }
            CacheUpdate::Account(address) => {
                if let Some(entry) = self.cache.account(&address) {
                    let view = &entry.value;
                    match &view.position {
                        Some(p) => info!(
                            %address,
                            balance = %view.collateral_balance,
                            size = %p.size,
                            pnl = %p.unrealized_pnl,
                            leverage = %p.leverage,
                            liquidatable = p.is_liquidatable,
                            "Account updated"
                        ),
                        None => info!(
                            %address,
                            balance = %view.collateral_balance,
                            "Account updated, no position"
                        ),
                    }
                }
            }
            CacheUpdate::Invalidated(scope) => debug!(%scope, "Invalidated"),
            CacheUpdate::Failed { scope, category } => {
                warn!(%scope, %category, "Refresh failed, showing last known value");
            }
            CacheUpdate::Rebound { generation } => info!(generation, "Cache rebound"),
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn log_event(event: &ChainEvent) {
    info!(event = event.name(), accounts = ?event.accounts(), "Contract event");
}

/// Load the trading key. A missing environment variable means read-only.
fn load_keys(account: &AccountConfig) -> AppResult<KeyManager> {
    match KeyManager::load(&account.key_source(), account.expected_address) {
        Ok(keys) => Ok(keys),
        Err(KeyError::EnvVarNotFound(var)) => {
            info!(var = %var, "No trading key configured, running read-only");
            Ok(KeyManager::read_only())
        }
        Err(e) => Err(e.into()),
    }
}

fn open_session(
    config: &AppConfig,
    convention: DecimalConvention,
    feed: &Arc<dyn IndexPriceFeed>,
    gateway: &ContractGateway,
    cache: &Arc<SnapshotCache>,
    parent: &CancellationToken,
) -> Session {
    let binding = gateway.binding();
    let guard = ChainGuard::new(binding.chain_id);
    let cancel = parent.child_token();

    let market = Arc::new(MarketSnapshotService::new(
        gateway.reader(),
        guard,
        Arc::clone(feed),
        convention,
        Price::new(config.feed.fallback_index),
    ));
    let positions = Arc::new(
        PositionValuationService::new(gateway.reader(), guard, convention)
            .with_tolerance(config.decimals.scale_tolerance),
    );
    let reader = Arc::new(CachedReader::new(
        Arc::clone(cache),
        market,
        positions,
        binding.generation,
        config.retry,
        &config.sync,
        cancel.clone(),
    ));

    let (invalidator, requests) = Invalidator::new(Arc::clone(cache));
    let bus = Arc::new(EventReconciliationBus::new(
        gateway.events(),
        invalidator.clone(),
        config.retry,
    ));

    let executor = gateway.trading_account().ok().map(|trader| {
        Arc::new(MutationExecutor::new(
            gateway.reader(),
            trader,
            guard,
            invalidator.clone(),
            convention,
            config.trade.clone(),
        ))
    });

    Session {
        reader,
        history: TradeHistoryService::new(gateway.reader(), convention, config.history.clone()),
        executor,
        invalidator,
        bus,
        requests: Some(requests),
        cancel,
    }
}
