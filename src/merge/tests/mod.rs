mod tests_filter;
