//! Example usage of the volatility, sizing and optimization toolkit

use common::MarketRegime;
use ndarray::array;
use portfolio_risk::{
    create_config_template, load_config, save_config, DynamicRiskManager, OptimizerConfig,
    PortfolioOptimizer, ReturnStatistics, VolatilityEstimator,
};

fn main() -> anyhow::Result<()> {
    println!("=== Risk Toolkit Example ===\n");

    // Example 0: Risk configuration round trip through a TOML file
    println!("Example 0: Risk Configuration");
    let path = std::env::temp_dir().join("risk_config_example.toml");
    create_config_template(&path)?;
    let mut risk_config = load_config(&path)?;
    risk_config.base_risk_per_trade = 0.015;
    save_config(&risk_config, &path)?;
    let risk_config = load_config(&path)?;
    println!("  {} -> risk per trade {:.1}%\n", path.display(), risk_config.base_risk_per_trade * 100.0);

    // Example 1: Volatility from a close series
    println!("Example 1: Realized Volatility");
    let closes: Vec<f64> = (0..20)
        .map(|i| 100.0 * (1.0 + 0.01 * ((i % 4) as f64 - 1.5)))
        .collect();
    let estimator = VolatilityEstimator::default();
    let estimate = estimator.estimate(&closes)?;
    println!("  Annualized: {:.2}%", estimate.annualized * 100.0);
    println!("  Size multiplier: {}\n", estimate.multiplier);

    // Example 2: Size a trade
    println!("Example 2: Position Sizing");
    let manager = DynamicRiskManager::new(risk_config);
    let sizing = manager.size_position(1_000.0, 100.0, 96.0, estimate.multiplier, MarketRegime::Normal)?;
    println!("  Position: ${:.2}", sizing.position_size_usd);
    println!("  Risk: ${:.2} ({:.2}%)", sizing.risk_amount, sizing.risk_percentage);
    println!("  Leverage: {:.2}x\n", sizing.leverage);

    // Example 3: Risk/reward gate
    println!("Example 3: Risk/Reward");
    let check = manager.validate_risk_reward(100.0, 112.0, 96.0);
    println!("  Ratio {:.2} (min {:.2}) -> valid: {}\n", check.ratio, check.min_required, check.valid);

    // Example 4: Kelly fraction
    println!("Example 4: Kelly Criterion");
    let kelly = DynamicRiskManager::kelly_fraction(0.55, 0.06, 0.04);
    println!("  Half-Kelly fraction: {:.2}%\n", kelly * 100.0);

    // Example 5: Portfolio optimization
    println!("Example 5: Mean-Variance Optimization");
    let stats = ReturnStatistics::new(
        vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
        array![0.45, 0.60, 0.80],
        array![[0.36, 0.30, 0.32], [0.30, 0.49, 0.40], [0.32, 0.40, 0.81]],
    )?;
    let optimizer = PortfolioOptimizer::new(OptimizerConfig::default());
    let tangency = optimizer.max_sharpe_or_equal_weight(&stats);
    for (asset, weight) in tangency.assets.iter().zip(&tangency.weights) {
        println!("  {}: {:.1}%", asset, weight * 100.0);
    }
    println!("  Sharpe: {:.3}\n", tangency.sharpe_ratio);

    for point in optimizer.efficient_frontier(&stats, &[0.50, 0.60, 0.70]) {
        println!(
            "  Frontier return {:.2} -> volatility {:.3}",
            point.expected_return, point.volatility
        );
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
