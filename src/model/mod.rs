pub mod xml_tree;
