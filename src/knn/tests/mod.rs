mod tests_topk;
