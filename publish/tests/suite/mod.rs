mod publish_flow;
