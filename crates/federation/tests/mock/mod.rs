pub mod mock_services;
