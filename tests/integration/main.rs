mod mock_ledger;
mod simulation;
