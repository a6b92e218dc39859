mod builder_flow;
