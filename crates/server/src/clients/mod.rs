pub mod uci_engine;
