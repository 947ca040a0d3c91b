pub mod mock_connector;
