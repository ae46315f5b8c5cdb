use crate::models::{AssetClass, AssetInfo};
use std::collections::HashMap;
use std::sync::OnceLock;

const GENERIC_BASE_PRICE: f64 = 1000.0;

const CATALOG: [(&str, &str, AssetClass); 46] = [
    ("^GSPC", "S&P 500", AssetClass::Index),
    ("^IXIC", "NASDAQ", AssetClass::Index),
    ("^WIG20", "WIG20", AssetClass::Index),
    ("^DJI", "Dow Jones Industrial Average", AssetClass::Index),
    ("^GDAXI", "DAX (Germany)", AssetClass::Index),
    ("^FTSE", "FTSE 100 (UK)", AssetClass::Index),
    ("^N225", "Nikkei 225 (Japan)", AssetClass::Index),
    ("^FCHI", "CAC 40 (France)", AssetClass::Index),
    ("AAPL", "Apple Inc.", AssetClass::Stock),
    ("MSFT", "Microsoft Corp.", AssetClass::Stock),
    ("GOOGL", "Alphabet Inc. (Google)", AssetClass::Stock),
    ("AMZN", "Amazon.com Inc.", AssetClass::Stock),
    ("TSLA", "Tesla Inc.", AssetClass::Stock),
    ("NVDA", "NVIDIA Corp.", AssetClass::Stock),
    ("META", "Meta Platforms", AssetClass::Stock),
    ("NFLX", "Netflix Inc.", AssetClass::Stock),
    ("AMD", "AMD", AssetClass::Stock),
    ("INTC", "Intel Corp.", AssetClass::Stock),
    ("CDR.WA", "CD Projekt", AssetClass::Stock),
    ("PKO.WA", "PKO BP", AssetClass::Stock),
    ("KGH.WA", "KGHM", AssetClass::Stock),
    ("ALE.WA", "Allegro", AssetClass::Stock),
    ("DNP.WA", "Dino Polska", AssetClass::Stock),
    ("PKN.WA", "Orlen", AssetClass::Stock),
    ("LPP.WA", "LPP", AssetClass::Stock),
    ("PEO.WA", "Pekao SA", AssetClass::Stock),
    ("BTC-USD", "Bitcoin", AssetClass::Crypto),
    ("ETH-USD", "Ethereum", AssetClass::Crypto),
    ("SOL-USD", "Solana", AssetClass::Crypto),
    ("BNB-USD", "Binance Coin", AssetClass::Crypto),
    ("XRP-USD", "XRP", AssetClass::Crypto),
    ("ADA-USD", "Cardano", AssetClass::Crypto),
    ("DOGE-USD", "Dogecoin", AssetClass::Crypto),
    ("DOT-USD", "Polkadot", AssetClass::Crypto),
    ("AVAX-USD", "Avalanche", AssetClass::Crypto),
    ("POL-USD", "Polygon (POL)", AssetClass::Crypto),
    ("LINK-USD", "Chainlink", AssetClass::Crypto),
    ("UNI-USD", "Uniswap", AssetClass::Crypto),
    ("ATOM-USD", "Cosmos", AssetClass::Crypto),
    ("LTC-USD", "Litecoin", AssetClass::Crypto),
    ("BCH-USD", "Bitcoin Cash", AssetClass::Crypto),
    ("ALGO-USD", "Algorand", AssetClass::Crypto),
    ("XLM-USD", "Stellar", AssetClass::Crypto),
    ("VET-USD", "VeChain", AssetClass::Crypto),
    ("FIL-USD", "Filecoin", AssetClass::Crypto),
    ("TRX-USD", "TRON", AssetClass::Crypto),
];

const SYNTHETIC_BASE_PRICES: [(&str, f64); 6] = [
    ("^GSPC", 4500.0),
    ("^IXIC", 14000.0),
    ("^WIG20", 2000.0),
    ("BTC-USD", 45000.0),
    ("ETH-USD", 3000.0),
    ("SOL-USD", 100.0),
];

/// Read-only instrument catalog, built once per process.
pub struct AssetCatalog {
    assets: Vec<AssetInfo>,
    index: HashMap<String, usize>,
}

static CATALOG_INSTANCE: OnceLock<AssetCatalog> = OnceLock::new();

impl AssetCatalog {
    pub fn global() -> &'static AssetCatalog {
        CATALOG_INSTANCE.get_or_init(|| {
            AssetCatalog::from_entries(CATALOG.iter().map(|(symbol, name, asset_class)| {
                AssetInfo {
                    symbol: symbol.to_string(),
                    name: name.to_string(),
                    asset_class: *asset_class,
                }
            }))
        })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = AssetInfo>) -> Self {
        let assets: Vec<AssetInfo> = entries.into_iter().collect();
        let index = assets
            .iter()
            .enumerate()
            .map(|(idx, asset)| (asset.symbol.clone(), idx))
            .collect();
        Self { assets, index }
    }

    pub fn all(&self) -> &[AssetInfo] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn asset(&self, symbol: &str) -> Option<&AssetInfo> {
        self.index.get(symbol).map(|&idx| &self.assets[idx])
    }

    pub fn display_name(&self, symbol: &str) -> String {
        self.asset(symbol)
            .map(|asset| asset.name.clone())
            .unwrap_or_else(|| symbol.to_string())
    }

    /// Case-insensitive match on symbol or display name.
    pub fn matching(&self, keywords: &str) -> Vec<&AssetInfo> {
        let needle = keywords.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.assets
            .iter()
            .filter(|asset| {
                asset.symbol.to_lowercase().contains(&needle)
                    || asset.name.to_lowercase().contains(&needle)
            })
            .collect()
    }
}

pub fn synthetic_base_price(symbol: &str) -> f64 {
    SYNTHETIC_BASE_PRICES
        .iter()
        .find(|(known, _)| *known == symbol)
        .map(|(_, price)| *price)
        .unwrap_or(GENERIC_BASE_PRICE)
}
