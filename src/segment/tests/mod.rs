mod tests_edge_cases;
mod tests_get;
