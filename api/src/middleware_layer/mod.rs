pub mod json_error_mapper;
